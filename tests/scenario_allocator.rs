//! S5 — disk allocator stress (SPEC_FULL.md section 8).

use emstore::block_manager::allocator::DiskBlockAllocator;
use emstore::file::mock::MockFile;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DISK_SIZE: u64 = 1 << 30;

#[test]
fn repeated_random_allocate_and_free_keeps_accounting_consistent() {
    let backend = MockFile::new(0);
    let allocator = DiskBlockAllocator::new(&backend, DISK_SIZE, false).unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let mut live: Vec<(u64, u64)> = Vec::new();

    for _ in 0..10_000 {
        for _ in 0..100 {
            let size = rng.gen_range(4096..=(2 * 1024 * 1024));
            match allocator.allocate(&backend, 1, size) {
                Ok(offsets) => live.push((offsets[0], size)),
                Err(_) => {
                    // Out of contiguous space this round; free half and retry later.
                }
            }
        }

        // Randomly free about half of what's live.
        let mut i = 0;
        while i < live.len() {
            if rng.gen_bool(0.5) {
                let (offset, size) = live.swap_remove(i);
                allocator.deallocate(offset, size).unwrap();
            } else {
                i += 1;
            }
        }

        assert_eq!(allocator.free_bytes() + allocator.used_bytes(), allocator.total_bytes());
        assert_eq!(allocator.total_bytes(), DISK_SIZE);
    }

    for (offset, size) in live {
        allocator.deallocate(offset, size).unwrap();
    }
    assert_eq!(allocator.free_bytes(), DISK_SIZE);
}
