//! S6 — WBTL write/read round-trip (SPEC_FULL.md section 8).

use emstore::file::mock::MockFile;
use emstore::file::wbtl::WbtlFile;
use emstore::file::FileBackend;

#[test]
fn writes_survive_flush_and_deleted_ranges_free_a_hole_for_reuse() {
    let wbtl = WbtlFile::new(Box::new(MockFile::new(0)), 1 << 20);
    wbtl.set_size(4 << 20).unwrap();

    let ranges = [(100u64, 4096usize, 0x11u8), (8192, 65536, 0x22), (2 * 1024 * 1024, 1024, 0x33)];

    for &(offset, size, pattern) in &ranges {
        wbtl.write_at(&vec![pattern; size], offset).unwrap();
    }
    wbtl.sync_data().unwrap();

    for &(offset, size, pattern) in &ranges {
        let mut out = vec![0u8; size];
        wbtl.read_at(&mut out, offset).unwrap();
        assert!(out.iter().all(|&b| b == pattern), "mismatch at logical offset {offset}");
    }

    let (mid_offset, mid_size, _) = ranges[1];
    wbtl.delete_region(mid_offset, mid_size as u64).unwrap();
    let mut out = vec![0u8; mid_size];
    assert!(wbtl.read_at(&mut out, mid_offset).is_err());

    // A subsequent write of the same size should succeed (first-fit can, but
    // need not, reuse the freed hole - what matters is the data round-trips).
    wbtl.write_at(&vec![0x44u8; mid_size], mid_offset).unwrap();
    let mut out2 = vec![0u8; mid_size];
    wbtl.read_at(&mut out2, mid_offset).unwrap();
    assert!(out2.iter().all(|&b| b == 0x44));

    // The untouched ranges are still intact.
    for &(offset, size, pattern) in &[ranges[0], ranges[2]] {
        let mut out = vec![0u8; size];
        wbtl.read_at(&mut out, offset).unwrap();
        assert!(out.iter().all(|&b| b == pattern));
    }
}
