//! emstore - an external-memory block I/O substrate
//!
//! Four layers, each building on the one below:
//!
//! - **File backends** ([`file`]): synchronous, `io_uring`, memory-mapped,
//!   in-memory, and write-buffered translation layer (WBTL) implementations
//!   of one small `FileBackend` trait.
//! - **Request/queue engine** ([`request`]): asynchronous request objects
//!   dispatched through per-disk worker pools.
//! - **Block manager** ([`block_manager`]): assigns block identifiers (BIDs)
//!   across a pool of disks and reclaims freed ranges.
//! - **Cache, streams, and merger** ([`cache`], [`stream`], [`merger`]):
//!   pinned/evictable block slots, double-buffered sequential streams, and a
//!   loser-tree multiway merger used by external sort and priority queues.
//!
//! None of this is a global singleton: an [`config::Environment`] owns one
//! `BlockManager` and the I/O statistics for a given set of configured
//! disks, constructed explicitly by the caller.

pub mod block_manager;
pub mod cache;
pub mod config;
pub mod error;
pub mod file;
pub mod merger;
pub mod request;
pub mod stats;
pub mod stream;
pub mod util;

pub use error::{Error, Result};
