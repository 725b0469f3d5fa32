//! Glue utilities (C7): semaphores, onoff switches, aligned allocation,
//! intrusive reference counting, and the winner tree.

pub mod aligned;
pub mod counting_ptr;
pub mod onoff;
pub mod semaphore;
pub mod time;
pub mod winner_tree;

pub use aligned::{AlignedBuffer, FillPattern};
pub use counting_ptr::{CountingPtr, ReferenceCount};
pub use onoff::OnOffSwitch;
pub use semaphore::Semaphore;
pub use winner_tree::WinnerTree;

/// Default alignment required by O_DIRECT-style backends.
pub const BLOCK_ALIGN: usize = 4096;
