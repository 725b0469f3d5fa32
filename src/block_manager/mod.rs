//! Block manager & disk allocators (C3), grounded on
//! `original_source/include/stxxl/bits/mng/block_manager.h` and
//! `bid.h`/`block_alloc_strategy.h`. Constructed once from a `DiskConfig[]`
//! as part of `Environment` (SPEC_FULL.md section 9: no global singleton,
//! replacing the source's `singleton<block_manager>`), then shared via
//! `Arc<BlockManager>`.

pub mod allocator;

use crate::config::DiskConfig;
use crate::error::Error;
use crate::file::mmap::MmapFile;
use crate::file::mock::MockFile;
use crate::file::sync::SyncFile;
use crate::file::wbtl::WbtlFile;
use crate::file::FileBackend;
use crate::Result;
use allocator::DiskBlockAllocator;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Sentinel backend id for a BID whose storage lifetime the allocator does
/// not track (SPEC_FULL.md section 3, "Block identifier (BID)").
pub const UNMANAGED: i32 = -1;

/// Triple naming a contiguous byte range on a specific backend file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bid {
    pub backend_id: i32,
    pub offset: u64,
    pub size: u64,
}

impl Bid {
    pub fn is_managed(&self) -> bool {
        self.backend_id != UNMANAGED
    }
}

/// Closed set of disk-assignment strategies (SPEC_FULL.md section 4.3),
/// grounded on `block_alloc_strategy.h`'s functor hierarchy.
#[derive(Debug, Clone)]
pub enum AllocationStrategy {
    RandomCyclic { permutation: Vec<usize>, seed: u64 },
    Striping,
    FullyRandom { seed: u64 },
    SimpleRandom,
}

impl AllocationStrategy {
    pub fn random_cyclic(num_disks: usize, seed: u64) -> Self {
        let mut permutation: Vec<usize> = (0..num_disks).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        permutation.shuffle(&mut rng);
        Self::RandomCyclic { permutation, seed }
    }

    fn disk_for(&self, i: u64, num_disks: usize) -> usize {
        if num_disks == 0 {
            return 0;
        }
        match self {
            AllocationStrategy::RandomCyclic { permutation, .. } => {
                permutation[(i as usize) % permutation.len()]
            }
            AllocationStrategy::Striping => (i as usize) % num_disks,
            AllocationStrategy::FullyRandom { seed } => {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i));
                rng.gen_range(0..num_disks)
            }
            AllocationStrategy::SimpleRandom => {
                // Deterministic hash of i, grounded on the source's
                // `simple_random` functor (splitmix64-style mix).
                let mut x = i.wrapping_add(0x9E3779B97F4A7C15);
                x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
                x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
                x ^= x >> 31;
                (x as usize) % num_disks
            }
        }
    }
}

struct Disk {
    file: Box<dyn FileBackend>,
    allocator: DiskBlockAllocator,
    block_size: u64,
}

fn open_backend(cfg: &DiskConfig) -> Result<Box<dyn FileBackend>> {
    use crate::config::IoBackend;
    match cfg.io_backend {
        IoBackend::Sync => Ok(Box::new(SyncFile::open(&cfg.path, cfg.mode_flags())?)),
        #[cfg(feature = "io_uring")]
        IoBackend::Uring => Ok(Box::new(crate::file::uring::UringFile::open(
            &cfg.path,
            cfg.mode_flags(),
        )?)),
        IoBackend::Mmap => Ok(Box::new(MmapFile::open(&cfg.path, cfg.size_bytes)?)),
        IoBackend::Mock => Ok(Box::new(MockFile::new(cfg.size_bytes))),
        IoBackend::Wbtl => Ok(Box::new(WbtlFile::with_default_block_size(Box::new(
            SyncFile::open(&cfg.path, cfg.mode_flags())?,
        )))),
    }
}

/// Manages allocation and deallocation of blocks across every configured
/// disk. Mirrors the source's `block_manager` minus the singleton.
pub struct BlockManager {
    disks: Vec<Disk>,
    total_allocation: AtomicU64,
    current_allocation: AtomicU64,
    maximum_allocation: Mutex<u64>,
}

impl BlockManager {
    pub fn new(disks: Vec<DiskConfig>) -> Result<Self> {
        if disks.is_empty() {
            return Err(Error::InvalidConfig(std::path::PathBuf::from(
                "<no disks configured>",
            )));
        }
        let mut built = Vec::with_capacity(disks.len());
        for cfg in &disks {
            let backend = open_backend(cfg)?;
            let allocator = DiskBlockAllocator::new(backend.as_ref(), cfg.size_bytes, cfg.autogrow)?;
            built.push(Disk {
                file: backend,
                allocator,
                block_size: crate::util::BLOCK_ALIGN as u64,
            });
        }
        Ok(Self {
            disks: built,
            total_allocation: AtomicU64::new(0),
            current_allocation: AtomicU64::new(0),
            maximum_allocation: Mutex::new(0),
        })
    }

    pub fn num_disks(&self) -> usize {
        self.disks.len()
    }

    /// Allocates `n` BIDs of `block_size` bytes each, assigning each to a
    /// disk via `strategy(offset_hint + i)`, then asking each disk's
    /// allocator for a contiguous range covering the blocks it was handed.
    /// Either every requested BID is produced, or none are (SPEC_FULL.md
    /// section 7: no partial allocation is ever exposed).
    pub fn new_blocks(
        &self,
        strategy: &AllocationStrategy,
        n: usize,
        block_size: u64,
        offset_hint: u64,
    ) -> Result<Vec<Bid>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        // Group requested slots by disk, preserving original index so the
        // output can be reassembled in request order.
        let mut per_disk: Vec<Vec<usize>> = vec![Vec::new(); self.disks.len()];
        for i in 0..n {
            let disk_idx = strategy.disk_for(offset_hint + i as u64, self.disks.len());
            per_disk[disk_idx].push(i);
        }

        let mut bids: Vec<Option<Bid>> = vec![None; n];
        for (disk_idx, slots) in per_disk.iter().enumerate() {
            if slots.is_empty() {
                continue;
            }
            let disk = &self.disks[disk_idx];
            let offsets = match disk
                .allocator
                .allocate(disk.file.as_ref(), slots.len() as u64, block_size)
            {
                Ok(offsets) => offsets,
                Err(e) => return Err(e),
            };
            for (&slot, offset) in slots.iter().zip(offsets) {
                bids[slot] = Some(Bid {
                    backend_id: disk_idx as i32,
                    offset,
                    size: block_size,
                });
            }
        }

        let bids: Vec<Bid> = bids.into_iter().map(|b| b.expect("every slot assigned")).collect();

        let total_bytes = n as u64 * block_size;
        self.total_allocation.fetch_add(total_bytes, Ordering::SeqCst);
        let current = self.current_allocation.fetch_add(total_bytes, Ordering::SeqCst) + total_bytes;
        let mut max = self.maximum_allocation.lock().unwrap();
        if current > *max {
            *max = current;
        }

        Ok(bids)
    }

    pub fn delete_blocks(&self, bids: &[Bid]) -> Result<()> {
        for bid in bids {
            if !bid.is_managed() {
                continue;
            }
            let disk = &self.disks[bid.backend_id as usize];
            disk.allocator.deallocate(bid.offset, bid.size)?;
            self.current_allocation.fetch_sub(bid.size, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn backend(&self, disk_index: usize) -> &dyn FileBackend {
        self.disks[disk_index].file.as_ref()
    }

    pub fn total_bytes(&self) -> u64 {
        self.disks.iter().map(|d| d.allocator.total_bytes()).sum()
    }

    pub fn free_bytes(&self) -> u64 {
        self.disks.iter().map(|d| d.allocator.free_bytes()).sum()
    }

    pub fn total_allocation(&self) -> u64 {
        self.total_allocation.load(Ordering::SeqCst)
    }

    pub fn current_allocation(&self) -> u64 {
        self.current_allocation.load(Ordering::SeqCst)
    }

    pub fn maximum_allocation(&self) -> u64 {
        *self.maximum_allocation.lock().unwrap()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoBackend;

    fn mock_disks(n: usize, size: u64) -> Vec<DiskConfig> {
        (0..n)
            .map(|i| DiskConfig::new(format!("disk{i}.bin"), size, IoBackend::Mock))
            .collect()
    }

    #[test]
    fn new_blocks_spreads_across_disks_via_striping() {
        let manager = BlockManager::new(mock_disks(4, 1 << 20)).unwrap();
        let bids = manager
            .new_blocks(&AllocationStrategy::Striping, 8, 4096, 0)
            .unwrap();
        assert_eq!(bids.len(), 8);
        for (i, bid) in bids.iter().enumerate() {
            assert_eq!(bid.backend_id, (i % 4) as i32);
        }
    }

    #[test]
    fn delete_then_reallocate_reuses_freed_space() {
        let manager = BlockManager::new(mock_disks(1, 1 << 16)).unwrap();
        let bids = manager
            .new_blocks(&AllocationStrategy::Striping, 4, 4096, 0)
            .unwrap();
        manager.delete_blocks(&bids).unwrap();
        assert_eq!(manager.current_allocation(), 0);

        let bids2 = manager
            .new_blocks(&AllocationStrategy::Striping, 4, 4096, 0)
            .unwrap();
        let mut offsets1: Vec<u64> = bids.iter().map(|b| b.offset).collect();
        let mut offsets2: Vec<u64> = bids2.iter().map(|b| b.offset).collect();
        offsets1.sort();
        offsets2.sort();
        assert_eq!(offsets1, offsets2);
    }

    #[test]
    fn allocation_accounting_is_monotone_and_tracks_current() {
        let manager = BlockManager::new(mock_disks(2, 1 << 20)).unwrap();
        manager
            .new_blocks(&AllocationStrategy::Striping, 10, 4096, 0)
            .unwrap();
        let total_after_first = manager.total_allocation();
        let bids = manager
            .new_blocks(&AllocationStrategy::Striping, 5, 4096, 10)
            .unwrap();
        assert!(manager.total_allocation() >= total_after_first);
        assert_eq!(manager.current_allocation(), 15 * 4096);
        manager.delete_blocks(&bids).unwrap();
        assert_eq!(manager.current_allocation(), 10 * 4096);
        assert!(manager.maximum_allocation() >= manager.current_allocation());
    }

    #[test]
    fn zero_length_request_returns_empty() {
        let manager = BlockManager::new(mock_disks(2, 1 << 16)).unwrap();
        let bids = manager
            .new_blocks(&AllocationStrategy::Striping, 0, 4096, 0)
            .unwrap();
        assert!(bids.is_empty());
    }
}
