//! Parallel multiway merge (section 4.6.1): splits `pieces` sorted inputs
//! into `pieces` output ranges at their exact global ranks (via
//! [`super::selection::multiseq_partition`]) and merges each range on its
//! own `rayon` worker, mirroring the source's `parallel_merge` /
//! `multiway_merge` split-then-merge structure in `original_source/include/
//! stxxl/bits/parallel/multiway_mergesort.h`. Concatenating the pieces in
//! order reproduces exactly the same sequence a single-threaded merge of
//! all inputs would produce, since each boundary is an exact rank split
//! rather than an estimate.

use super::selection::multiseq_partition;
use super::{run as merge_run, Comparator};

/// Merges `seqs` (each individually sorted) using up to `pieces` `rayon`
/// workers. `pieces` is clamped to `[1, total element count]`.
pub fn parallel_merge<T, C>(seqs: &[&[T]], comparator: &C, stable: bool, pieces: usize) -> Vec<T>
where
    T: Clone + Send + Sync,
    C: Comparator<T>,
{
    let m = seqs.len();
    let total: usize = seqs.iter().map(|s| s.len()).sum();
    if total == 0 {
        return Vec::new();
    }
    let pieces = pieces.max(1).min(total);

    let mut boundaries: Vec<Vec<usize>> = Vec::with_capacity(pieces + 1);
    boundaries.push(vec![0; m]);
    for p in 1..pieces {
        let rank = (total * p) / pieces;
        boundaries.push(multiseq_partition(seqs, rank, comparator));
    }
    boundaries.push(seqs.iter().map(|s| s.len()).collect());

    let mut outputs: Vec<Vec<T>> = (0..pieces).map(|_| Vec::new()).collect();
    rayon::scope(|scope| {
        for (idx, out) in outputs.iter_mut().enumerate() {
            let lo = &boundaries[idx];
            let hi = &boundaries[idx + 1];
            let slices: Vec<Box<dyn Iterator<Item = T> + Send>> = seqs
                .iter()
                .enumerate()
                .map(|(i, s)| -> Box<dyn Iterator<Item = T> + Send> { Box::new(s[lo[i]..hi[i]].to_vec().into_iter()) })
                .collect();
            scope.spawn(move |_| {
                merge_run(slices, comparator, stable, out);
            });
        }
    });

    outputs.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    struct Ascending;
    impl Comparator<i64> for Ascending {
        fn compare(&self, a: &i64, b: &i64) -> Ordering {
            a.cmp(b)
        }
        fn max_value(&self) -> i64 {
            i64::MAX
        }
    }

    #[test]
    fn parallel_merge_matches_sequential_merge_with_many_pieces() {
        let a: Vec<i64> = (0..1000).map(|i| i * 2).collect();
        let b: Vec<i64> = (0..700).map(|i| i * 3 + 1).collect();
        let c: Vec<i64> = (0..50).map(|i| i * 17).collect();
        let seqs: Vec<&[i64]> = vec![&a, &b, &c];

        let mut expected: Vec<i64> = a.iter().chain(&b).chain(&c).copied().collect();
        expected.sort();

        let got = parallel_merge(&seqs, &Ascending, true, 8);
        assert_eq!(got, expected);
    }

    #[test]
    fn parallel_merge_with_one_piece_is_a_plain_merge() {
        let a: Vec<i64> = vec![1, 4, 9];
        let b: Vec<i64> = vec![2, 3, 10];
        let seqs: Vec<&[i64]> = vec![&a, &b];
        let got = parallel_merge(&seqs, &Ascending, true, 1);
        assert_eq!(got, vec![1, 2, 3, 4, 9, 10]);
    }

    #[test]
    fn empty_inputs_merge_to_empty() {
        let a: Vec<i64> = Vec::new();
        let seqs: Vec<&[i64]> = vec![&a];
        let got = parallel_merge(&seqs, &Ascending, true, 4);
        assert!(got.is_empty());
    }

    #[test]
    fn pieces_request_larger_than_total_is_clamped() {
        let a: Vec<i64> = vec![3, 1, 2];
        let mut sorted_a = a.clone();
        sorted_a.sort();
        let seqs: Vec<&[i64]> = vec![&sorted_a];
        let got = parallel_merge(&seqs, &Ascending, true, 100);
        assert_eq!(got, sorted_a);
    }
}
