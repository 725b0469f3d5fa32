//! Write pool ("write stream"): a depth-bounded ring of outstanding async
//! writes against a fixed, ordered BID sequence (SPEC_FULL.md section 4.5).

use crate::block_manager::{BlockManager, Bid};
use crate::error::Error;
use crate::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::prefetch::DEFAULT_DEPTH;

pub struct WritePool {
    manager: Arc<BlockManager>,
    bids: Vec<Bid>,
    depth: usize,
    next_index: usize,
    inflight: VecDeque<JoinHandle<Result<()>>>,
}

impl WritePool {
    pub fn new(manager: Arc<BlockManager>, bids: Vec<Bid>, depth: usize) -> Self {
        Self {
            manager,
            bids,
            depth: depth.max(1),
            next_index: 0,
            inflight: VecDeque::new(),
        }
    }

    pub fn with_default_depth(manager: Arc<BlockManager>, bids: Vec<Bid>) -> Self {
        Self::new(manager, bids, DEFAULT_DEPTH)
    }

    /// Enqueues `buf` for async write against the next BID in sequence.
    /// Blocks only if the ring is already at `depth` outstanding writes.
    pub fn write_next(&mut self, buf: Vec<u8>) -> Result<()> {
        if self.next_index >= self.bids.len() {
            return Err(Error::StateViolation {
                message: "write_next called past the end of the write pool's BID sequence".into(),
            });
        }
        if self.inflight.len() >= self.depth {
            self.join_oldest()?;
        }
        let bid = self.bids[self.next_index];
        self.next_index += 1;
        let manager = self.manager.clone();
        self.inflight.push_back(std::thread::spawn(move || {
            manager
                .backend(bid.backend_id as usize)
                .write_at(&buf, bid.offset)
                .map(|_| ())
        }));
        Ok(())
    }

    fn join_oldest(&mut self) -> Result<()> {
        let handle = self
            .inflight
            .pop_front()
            .expect("join_oldest called with no outstanding write");
        handle
            .join()
            .unwrap_or_else(|_| Err(Error::invariant("write worker thread panicked")))
    }

    /// Waits for every outstanding write to complete.
    pub fn flush(&mut self) -> Result<()> {
        while !self.inflight.is_empty() {
            self.join_oldest()?;
        }
        Ok(())
    }

    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }
}

impl Drop for WritePool {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            eprintln!("warning: write pool dropped with a failed outstanding write: {e}");
        }
    }
}
