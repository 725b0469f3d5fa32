//! Configuration types consumed directly by the core (no file parsing here,
//! see SPEC_FULL.md section 6 — that lives in a caller crate if needed).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::block_manager::BlockManager;

/// Recognized `open()` mode flags, closed set per SPEC_FULL.md section 4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenModeFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub direct: bool,
    pub sync: bool,
    pub require_direct: bool,
    pub no_lock: bool,
}

impl OpenModeFlags {
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }
}

/// Which backend implementation a disk is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoBackend {
    Sync,
    #[cfg(feature = "io_uring")]
    Uring,
    Mmap,
    Mock,
    Wbtl,
}

/// Per-disk configuration. A `Vec<DiskConfig>` is the sole input the
/// block manager consumes to build its `Environment` (SPEC_FULL.md section 9:
/// no global singleton).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub io_backend: IoBackend,
    #[serde(default)]
    pub autogrow: bool,
    #[serde(default)]
    pub queue_id: Option<u32>,
    #[serde(default)]
    pub direct: bool,
    #[serde(default)]
    pub sync: bool,
}

impl DiskConfig {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64, io_backend: IoBackend) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            io_backend,
            autogrow: false,
            queue_id: None,
            direct: false,
            sync: false,
        }
    }

    pub fn mode_flags(&self) -> OpenModeFlags {
        OpenModeFlags {
            read: true,
            write: true,
            create: true,
            direct: self.direct,
            sync: self.sync,
            ..Default::default()
        }
    }
}

/// Replaces the original's global singletons (`block_manager`, `stats`,
/// `config`). A typed value constructed once and threaded through container
/// constructors, with a convenience shared default for top-level tools.
pub struct Environment {
    pub block_manager: Arc<BlockManager>,
}

impl Environment {
    pub fn new(disks: Vec<DiskConfig>) -> crate::Result<Self> {
        Ok(Self {
            block_manager: Arc::new(BlockManager::new(disks)?),
        })
    }

    /// Convenience constructor for tools that just want one shared instance;
    /// this is an explicit value the caller owns, not a hidden global.
    pub fn default_shared(disks: Vec<DiskConfig>) -> crate::Result<Arc<Self>> {
        Ok(Arc::new(Self::new(disks)?))
    }
}
