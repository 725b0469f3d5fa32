//! Linux io_uring backend, grounded on the teacher's
//! `engine/io_uring.rs` and `original_source/io/linuxaio_*` (the closest
//! async-submission analogue in the original). Per SPEC_FULL.md section 4.1,
//! C2's `DiskQueue` worker thread already provides the submit/complete split
//! at a higher layer, so this backend submits one SQE and waits for its own
//! completion rather than running a separate reaper thread: a real
//! io_uring-based implementation, simplified to a synchronous
//! `FileBackend::read_at`/`write_at` call per operation.

use super::{check_alignment, FileBackend};
use crate::config::OpenModeFlags;
use crate::error::{Error, IoErrorKind};
use crate::Result;
use io_uring::{opcode, types, IoUring};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::Mutex;

pub struct UringFile {
    file: std::fs::File,
    ring: Mutex<IoUring>,
    direct: bool,
}

impl UringFile {
    pub fn open(path: &Path, flags: OpenModeFlags) -> Result<Self> {
        let file = super::open_os_file(path, flags)?;

        let mut direct = false;
        if flags.direct {
            if Self::enable_direct(&file).is_ok() {
                direct = true;
            } else if flags.require_direct {
                return Err(Error::io(
                    IoErrorKind::Open,
                    "O_DIRECT required but not available",
                ));
            } else {
                eprintln!("warning: O_DIRECT not available, falling back to buffered I/O");
            }
        }

        let ring = IoUring::new(32).map_err(|e| Error::io_from(IoErrorKind::Open, 0, e))?;

        Ok(Self {
            file,
            ring: Mutex::new(ring),
            direct,
        })
    }

    #[cfg(target_os = "linux")]
    fn enable_direct(file: &std::fs::File) -> std::io::Result<()> {
        let fd = file.as_raw_fd();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_DIRECT) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn enable_direct(_file: &std::fs::File) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "O_DIRECT not supported on this platform",
        ))
    }

    fn submit_and_wait(&self, entry: io_uring::squeue::Entry, kind: IoErrorKind, offset: u64) -> Result<i32> {
        let mut ring = self.ring.lock().unwrap();

        unsafe {
            ring.submission()
                .push(&entry)
                .map_err(|e| Error::io(kind, format!("submission queue full: {e}")))?;
        }
        ring.submit_and_wait(1)
            .map_err(|e| Error::io_from(kind, offset, e))?;

        let cqe = ring
            .completion()
            .next()
            .ok_or_else(|| Error::io(kind, "no completion queue entry after submit_and_wait"))?;

        let result = cqe.result();
        if result < 0 {
            return Err(Error::io_from(
                kind,
                offset,
                std::io::Error::from_raw_os_error(-result),
            ));
        }
        Ok(result)
    }
}

impl FileBackend for UringFile {
    fn size(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| Error::io_from(IoErrorKind::Seek, 0, e))
    }

    fn set_size(&self, new_size: u64) -> Result<()> {
        self.file
            .set_len(new_size)
            .map_err(|e| Error::io_from(IoErrorKind::Write, new_size, e))
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if self.direct {
            check_alignment(offset, buf.len(), crate::util::BLOCK_ALIGN)?;
        }
        let fd = types::Fd(self.file.as_raw_fd());
        let entry = opcode::Read::new(fd, buf.as_mut_ptr(), buf.len() as u32)
            .offset(offset)
            .build();
        let n = self.submit_and_wait(entry, IoErrorKind::Read, offset)?;
        Ok(n as usize)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        if self.direct {
            check_alignment(offset, buf.len(), crate::util::BLOCK_ALIGN)?;
        }
        let fd = types::Fd(self.file.as_raw_fd());
        let entry = opcode::Write::new(fd, buf.as_ptr(), buf.len() as u32)
            .offset(offset)
            .build();
        let n = self.submit_and_wait(entry, IoErrorKind::Write, offset)?;
        Ok(n as usize)
    }

    fn discard(&self, offset: u64, len: u64) -> Result<()> {
        let result = unsafe {
            libc::fallocate(
                self.file.as_raw_fd(),
                libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
                offset as i64,
                len as i64,
            )
        };
        if result < 0 {
            return Ok(()); // best-effort, not every filesystem supports it
        }
        Ok(())
    }

    fn sync_data(&self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| Error::io_from(IoErrorKind::Write, 0, e))
    }

    fn backend_name(&self) -> &'static str {
        "io_uring"
    }
}
