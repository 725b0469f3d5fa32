//! In-memory mock backend for tests: an `O(1)` dense byte vector, grounded
//! on the teacher's `engine/mock.rs`.

use super::FileBackend;
use crate::error::{Error, IoErrorKind};
use crate::Result;
use std::sync::RwLock;

pub struct MockFile {
    data: RwLock<Vec<u8>>,
}

impl MockFile {
    pub fn new(initial_size: u64) -> Self {
        Self {
            data: RwLock::new(vec![0u8; initial_size as usize]),
        }
    }
}

impl Default for MockFile {
    fn default() -> Self {
        Self::new(0)
    }
}

impl FileBackend for MockFile {
    fn size(&self) -> Result<u64> {
        Ok(self.data.read().unwrap().len() as u64)
    }

    fn set_size(&self, new_size: u64) -> Result<()> {
        self.data.write().unwrap().resize(new_size as usize, 0);
        Ok(())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.data.read().unwrap();
        let offset = offset as usize;
        if offset > data.len() {
            return Err(Error::io_at(IoErrorKind::Read, offset as u64, "read past end"));
        }
        let available = (data.len() - offset).min(buf.len());
        buf[..available].copy_from_slice(&data[offset..offset + available]);
        Ok(available)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let mut data = self.data.write().unwrap();
        let offset = offset as usize;
        let needed = offset + buf.len();
        if needed > data.len() {
            data.resize(needed, 0);
        }
        data[offset..needed].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_extends_file_automatically() {
        let file = MockFile::new(0);
        file.write_at(&[1, 2, 3], 10).unwrap();
        assert_eq!(file.size().unwrap(), 13);
    }

    #[test]
    fn read_past_end_returns_short_read() {
        let file = MockFile::new(4);
        file.write_at(&[1, 2, 3, 4], 0).unwrap();
        let mut buf = [0u8; 10];
        let n = file.read_at(&mut buf, 0).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn set_size_shrinks_and_grows() {
        let file = MockFile::new(100);
        file.set_size(10).unwrap();
        assert_eq!(file.size().unwrap(), 10);
        file.set_size(50).unwrap();
        assert_eq!(file.size().unwrap(), 50);
    }
}
