//! Prefetch pool ("read stream"): pre-issues reads ahead of a consumer's
//! cursor over a fixed, ordered BID sequence (SPEC_FULL.md section 4.5).

use crate::block_manager::{BlockManager, Bid};
use crate::error::Error;
use crate::stream::Stream;
use crate::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Default ring depth when the caller doesn't have a more specific number in
/// mind, matching the source's `2 * disks_number()` convention for a
/// single-disk setup.
pub const DEFAULT_DEPTH: usize = 2;

pub struct PrefetchPool {
    manager: Arc<BlockManager>,
    bids: Vec<Bid>,
    block_size: usize,
    next_issue: usize,
    inflight: VecDeque<JoinHandle<Result<Vec<u8>>>>,
    current: Option<Vec<u8>>,
}

impl PrefetchPool {
    /// `depth` is the number of reads kept outstanding ahead of the cursor;
    /// it is clamped to at least 1.
    pub fn new(manager: Arc<BlockManager>, bids: Vec<Bid>, block_size: usize, depth: usize) -> Result<Self> {
        let mut pool = Self {
            manager,
            bids,
            block_size,
            next_issue: 0,
            inflight: VecDeque::new(),
            current: None,
        };
        let initial = depth.max(1).min(pool.bids.len());
        for _ in 0..initial {
            pool.issue_next();
        }
        if !pool.inflight.is_empty() {
            pool.current = Some(pool.pull_next()?);
        }
        Ok(pool)
    }

    fn issue_next(&mut self) {
        if self.next_issue >= self.bids.len() {
            return;
        }
        let bid = self.bids[self.next_issue];
        self.next_issue += 1;
        let manager = self.manager.clone();
        let block_size = self.block_size;
        self.inflight.push_back(std::thread::spawn(move || {
            let mut buf = vec![0u8; block_size];
            manager.backend(bid.backend_id as usize).read_at(&mut buf, bid.offset)?;
            Ok(buf)
        }));
    }

    fn pull_next(&mut self) -> Result<Vec<u8>> {
        let handle = self
            .inflight
            .pop_front()
            .expect("pull_next called with no outstanding prefetch");
        handle
            .join()
            .unwrap_or_else(|_| Err(Error::invariant("prefetch worker thread panicked")))
    }

    pub fn remaining(&self) -> usize {
        (self.bids.len() - self.next_issue) + self.inflight.len() + usize::from(self.current.is_some())
    }
}

impl Stream for PrefetchPool {
    type Item = Vec<u8>;

    fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    fn peek(&self) -> &Vec<u8> {
        self.current.as_ref().expect("peek on empty prefetch pool")
    }

    fn advance(&mut self) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }
        self.issue_next();
        self.current = if self.inflight.is_empty() {
            None
        } else {
            Some(self.pull_next()?)
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_manager::AllocationStrategy;
    use crate::config::{DiskConfig, IoBackend};

    fn manager_with_blocks(n: usize, block_size: u64) -> (Arc<BlockManager>, Vec<Bid>) {
        let disks = vec![DiskConfig::new("d0.bin", 1 << 20, IoBackend::Mock)];
        let manager = Arc::new(BlockManager::new(disks).unwrap());
        let bids = manager
            .new_blocks(&AllocationStrategy::Striping, n, block_size, 0)
            .unwrap();
        for (i, bid) in bids.iter().enumerate() {
            let buf = vec![i as u8; block_size as usize];
            manager.backend(bid.backend_id as usize).write_at(&buf, bid.offset).unwrap();
        }
        (manager, bids)
    }

    #[test]
    fn reads_blocks_back_in_order() {
        let (manager, bids) = manager_with_blocks(5, 4096);
        let mut pool = PrefetchPool::new(manager, bids, 4096, DEFAULT_DEPTH).unwrap();

        let mut seen = Vec::new();
        while !pool.is_empty() {
            seen.push(pool.peek()[0]);
            pool.advance().unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn empty_bid_sequence_is_immediately_empty() {
        let (manager, _) = manager_with_blocks(0, 4096);
        let pool = PrefetchPool::new(manager, Vec::new(), 4096, DEFAULT_DEPTH).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn depth_larger_than_sequence_still_reads_everything() {
        let (manager, bids) = manager_with_blocks(3, 4096);
        let mut pool = PrefetchPool::new(manager, bids, 4096, 16).unwrap();
        let mut count = 0;
        while !pool.is_empty() {
            count += 1;
            pool.advance().unwrap();
        }
        assert_eq!(count, 3);
    }
}
