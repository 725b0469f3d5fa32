//! File backends (C1): map byte-range operations onto a concrete substrate.
//!
//! `FileBackend` is the capability interface SPEC_FULL.md section 9 calls for
//! in place of the original's deep inheritance hierarchy: a closed set of
//! backend implementations behind one trait object, matching the teacher's
//! `Box<dyn IOEngine>` pattern (`engine/mod.rs`).

pub mod mock;
pub mod mmap;
pub mod sync;
#[cfg(feature = "io_uring")]
pub mod uring;
pub mod wbtl;

use crate::error::{Error, IoErrorKind};
use crate::util::counting_ptr::{Counted, ReferenceCount};
use crate::Result;
use std::path::Path;

/// Recognized `open()` mode flags (SPEC_FULL.md section 4.1). Re-exported
/// here so backend modules don't need to reach into `config`.
pub use crate::config::OpenModeFlags;

/// Per-backend capability surface. The queue engine (C2) dispatches on this
/// trait rather than on a concrete backend type.
pub trait FileBackend: Send + Sync {
    /// Current logical size in bytes.
    fn size(&self) -> Result<u64>;

    /// Grow or shrink. Growing may or may not zero the new region
    /// (backend-defined); shrinking below in-use ranges is undefined.
    fn set_size(&self, new_size: u64) -> Result<()>;

    /// Synchronous positioned read. Partial reads not at EOF are an error.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Synchronous positioned write. Partial writes are an error.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Inform the backend that `[offset, offset+len)` is no longer needed.
    /// Default is a no-op (most backends don't support hole punching).
    fn discard(&self, _offset: u64, _len: u64) -> Result<()> {
        Ok(())
    }

    /// Flush to durable storage.
    fn sync_data(&self) -> Result<()> {
        Ok(())
    }

    /// A short machine-readable name for diagnostics.
    fn backend_name(&self) -> &'static str;
}

/// A managed file: a backend plus the reference-count a `CountingPtr<File>`
/// needs, and the queue/allocator identity containers use to route requests.
///
/// Mirrors the original's `file : public reference_count` (SPEC_FULL.md
/// section 9): outstanding requests hold a `CountingPtr<File>`, and `Drop`
/// asserts none remain, replacing the original's cyclic file<->request graph
/// with two acyclic references plus this count.
pub struct File {
    backend: Box<dyn FileBackend>,
    rc: ReferenceCount,
    queue_id: u32,
    allocator_id: i32,
}

impl File {
    pub fn new(backend: Box<dyn FileBackend>, queue_id: u32, allocator_id: i32) -> Self {
        Self {
            backend,
            rc: ReferenceCount::new(),
            queue_id,
            allocator_id,
        }
    }

    pub fn backend(&self) -> &dyn FileBackend {
        self.backend.as_ref()
    }

    pub fn queue_id(&self) -> u32 {
        self.queue_id
    }

    pub fn allocator_id(&self) -> i32 {
        self.allocator_id
    }
}

impl Counted for File {
    fn reference_count(&self) -> &ReferenceCount {
        &self.rc
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let outstanding = self.rc.get();
        if outstanding != 0 {
            eprintln!(
                "warning: file '{}' dropped with {} outstanding request reference(s)",
                self.backend.backend_name(),
                outstanding
            );
            debug_assert_eq!(outstanding, 0, "file dropped with outstanding request refs");
        }
    }
}

/// Validate that `offset`/`len` satisfy the backend's required alignment
/// for direct I/O. Shared by every backend that supports `Direct`.
pub fn check_alignment(offset: u64, len: usize, align: usize) -> Result<()> {
    if offset as usize % align != 0 || len % align != 0 {
        return Err(Error::Alignment {
            message: format!(
                "offset {offset} / length {len} not aligned to required {align} bytes"
            ),
        });
    }
    Ok(())
}

pub(crate) fn open_os_file(path: &Path, flags: OpenModeFlags) -> Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.read(flags.read).write(flags.write);
    if flags.create {
        options.create(true);
    }
    if flags.truncate {
        options.truncate(true);
    }
    options
        .open(path)
        .map_err(|e| Error::io_from(IoErrorKind::Open, 0, e))
}
