//! S4 — multiway merge of 1024 sorted runs (SPEC_FULL.md section 8).

use emstore::merger::parallel::parallel_merge;
use emstore::merger::Comparator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;

struct Ascending;
impl Comparator<u32> for Ascending {
    fn compare(&self, a: &u32, b: &u32) -> Ordering {
        a.cmp(b)
    }
    fn max_value(&self) -> u32 {
        u32::MAX
    }
}

#[test]
fn merges_1024_sorted_runs_with_eight_workers() {
    let run_len = 1usize << 15;
    let num_runs = 1024;

    let mut rng = StdRng::seed_from_u64(42);
    let runs: Vec<Vec<u32>> = (0..num_runs)
        .map(|_| {
            let mut run: Vec<u32> = (0..run_len).map(|_| rng.gen_range(0..(1 << 30))).collect();
            run.sort();
            run
        })
        .collect();
    let seqs: Vec<&[u32]> = runs.iter().map(|r| r.as_slice()).collect();

    let merged = parallel_merge(&seqs, &Ascending, true, 8);

    assert_eq!(merged.len(), num_runs * run_len);
    assert!(merged.windows(2).all(|w| w[0] <= w[1]));

    let mut expected: Vec<u32> = runs.into_iter().flatten().collect();
    expected.sort();
    assert_eq!(merged, expected);
}
