//! S3 — block-cache eviction correctness (SPEC_FULL.md section 8).

use emstore::block_manager::{AllocationStrategy, BlockManager};
use emstore::cache::{BlockCache, EvictionPolicy, SwappableBlockId};
use emstore::config::{DiskConfig, IoBackend};
use std::sync::Arc;

const BLOCK_SIZE: usize = 4096;
const PATTERN: u8 = 0xA5;

fn manager() -> Arc<BlockManager> {
    let disks = vec![DiskConfig::new("scenario_cache.bin", 1 << 20, IoBackend::Mock)];
    Arc::new(BlockManager::new(disks).unwrap())
}

fn new_block(manager: &Arc<BlockManager>, cache: &BlockCache) -> SwappableBlockId {
    let bid = manager
        .new_blocks(&AllocationStrategy::Striping, 1, BLOCK_SIZE as u64, 0)
        .unwrap()[0];
    let id = cache.allocate();
    cache.initialize(id, bid).unwrap();
    id
}

fn fill_with_pattern(cache: &BlockCache, id: SwappableBlockId) {
    let slot = cache.acquire(id).unwrap();
    cache.with_slot_mut(slot, |b| b.as_mut_slice().fill(PATTERN));
    cache.release(id, true).unwrap();
}

fn assert_has_pattern(cache: &BlockCache, id: SwappableBlockId) {
    let slot = cache.acquire(id).unwrap();
    cache.with_slot(slot, |b| assert!(b.as_slice().iter().all(|&byte| byte == PATTERN)));
    cache.release(id, false).unwrap();
}

#[test]
fn eviction_and_reacquire_preserves_written_content() {
    let mgr = manager();
    let cache = BlockCache::new(mgr.clone(), 3, BLOCK_SIZE, EvictionPolicy::Lru);

    let blocks: Vec<SwappableBlockId> = (0..5).map(|_| new_block(&mgr, &cache)).collect();

    // Fill blocks 0..2 with pattern A (only 3 slots available, no eviction
    // pressure yet for this first loop).
    for &id in &blocks[0..3] {
        fill_with_pattern(&cache, id);
    }

    // Acquiring 3 and 4 forces the eviction of 0 and 1 (LRU order).
    for &id in &blocks[3..5] {
        fill_with_pattern(&cache, id);
    }

    // Re-acquire in an order that forces 1 to be re-read from disk.
    for &id in &[blocks[2], blocks[3], blocks[1]] {
        assert_has_pattern(&cache, id);
    }

    // Every block, including the ones evicted and brought back, still
    // holds pattern A.
    for &id in &blocks {
        assert_has_pattern(&cache, id);
    }
}
