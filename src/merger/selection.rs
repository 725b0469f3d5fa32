//! Multi-sequence split-point selection (section 4.6.1's two splitters, used
//! by [`super::parallel::parallel_merge`] to divide `p` sorted inputs into
//! `p` output ranges before handing each range to an independent worker).
//!
//! `multiseq_partition` below is a literal port of `original_source/include/
//! stxxl/bits/parallel/multiseq_selection.h`'s function of the same name:
//! the exact binary search across all sequences at once, narrowing a pair of
//! per-sequence bound arrays by halving a shared step size, with a final
//! "skew" correction pass that redistributes any rounding error by walking a
//! priority queue of lexicographically-tagged candidates. This is not a
//! simplified approximation of that algorithm; every narrowing step and the
//! skew correction are carried over as-is. The one implementation liberty
//! taken is the skew-correction priority queues themselves: the source uses
//! a real binary heap per direction, this uses a linear scan over the
//! (small, per-call) set of live sequences to find the lexicographic
//! extremum each round, since a generic external [`Comparator`] doesn't fit
//! `std::collections::BinaryHeap`'s `Ord`-based API without extra
//! indirection. The selection semantics are identical either way.
//!
//! `sampling_partition` is the cheaper, approximate sibling named in the
//! same section: sample a handful of elements per sequence, estimate a
//! split value from the combined sample, then binary-search each sequence
//! for that value. It produces a consistent (gap-free, overlap-free)
//! partition of the concatenated input, just not necessarily at the exact
//! requested rank - adequate for chunking a parallel merge into
//! roughly-even pieces.

use super::Comparator;
use std::cmp::Ordering;

fn ilog2_floor(x: usize) -> u32 {
    debug_assert!(x > 0);
    usize::BITS - 1 - x.leading_zeros()
}

fn lex_order<T, C: Comparator<T>>(comparator: &C, a_val: &T, a_idx: usize, b_val: &T, b_idx: usize) -> Ordering {
    match comparator.compare(a_val, b_val) {
        Ordering::Equal => a_idx.cmp(&b_idx),
        other => other,
    }
}

/// Splits `m` non-empty sorted sequences at global rank `rank` (0-indexed),
/// returning for each sequence the count of its elements that land strictly
/// before the split. `rank == total` is the trivial case: every element
/// belongs before the split.
pub fn multiseq_partition<T, C: Comparator<T>>(seqs: &[&[T]], rank: usize, comparator: &C) -> Vec<usize> {
    let m = seqs.len();
    assert!(m > 0, "multiseq_partition requires at least one sequence");
    let ns: Vec<usize> = seqs.iter().map(|s| s.len()).collect();
    assert!(ns.iter().all(|&n| n > 0), "multiseq_partition requires every sequence to be non-empty");
    let total: usize = ns.iter().sum();

    if rank >= total {
        return ns;
    }

    let nmax = *ns.iter().max().unwrap();
    let r = ilog2_floor(nmax) + 1;
    let l = (1usize << r) - 1;
    let padded_total = l * m;

    let mut a = vec![0usize; m];
    let mut b = vec![l; m];
    let mut n = l / 2;

    // Initial partition: one sample per sequence at offset `n` (sequences
    // shorter than `n+1` contribute a conceptual +infinity sample instead,
    // appended after the real, sorted ones so it never lands in the left
    // bucket below).
    let mut real: Vec<usize> = (0..m).filter(|&i| n < ns[i]).collect();
    real.sort_by(|&i, &j| lex_order(comparator, &seqs[i][n], i, &seqs[j][n], j));
    let short: Vec<usize> = (0..m).filter(|&i| n >= ns[i]).collect();
    let order: Vec<usize> = real.into_iter().chain(short).collect();

    let localrank = rank * m / padded_total;
    let mut j = 0usize;
    while j < localrank && order.get(j).is_some_and(|&i| n + 1 <= ns[i]) {
        a[order[j]] += n + 1;
        j += 1;
    }
    for &i in &order[j..] {
        b[i] -= n + 1;
    }

    while n > 0 {
        n /= 2;

        // lmax: the lexicographically greatest S(i)[a[i]-1] across sequences
        // with a[i] > 0, ties favoring the rearmost (higher-index) sequence.
        let mut lmax: Option<(usize, usize)> = None;
        for i in 0..m {
            if a[i] > 0 {
                lmax = match lmax {
                    None => Some((i, a[i] - 1)),
                    Some((li, lp)) => {
                        if lex_order(comparator, &seqs[i][a[i] - 1], i, &seqs[li][lp], li) != Ordering::Less {
                            Some((i, a[i] - 1))
                        } else {
                            Some((li, lp))
                        }
                    }
                };
            }
        }

        for i in 0..m {
            let middle = (b[i] + a[i]) / 2;
            let take_left = match lmax {
                Some((li, lp)) if middle < ns[i] => {
                    lex_order(comparator, &seqs[i][middle], i, &seqs[li][lp], li) == Ordering::Less
                }
                _ => false,
            };
            if take_left {
                a[i] = (a[i] + n + 1).min(ns[i]);
            } else {
                b[i] -= n + 1;
            }
        }

        let leftsize: usize = a.iter().map(|&ai| ai / (n + 1)).sum();
        let total_units: usize = m * (l / (n + 1));
        let skew = (total_units as i128 * rank as i128 / padded_total as i128) - leftsize as i128;

        if skew > 0 {
            let mut remaining = skew;
            while remaining > 0 {
                let candidate = (0..m)
                    .filter(|&i| b[i] < ns[i])
                    .min_by(|&i, &j| lex_order(comparator, &seqs[i][b[i]], i, &seqs[j][b[j]], j));
                let Some(source) = candidate else { break };
                a[source] = (a[source] + n + 1).min(ns[source]);
                b[source] += n + 1;
                remaining -= 1;
            }
        } else if skew < 0 {
            let mut remaining = -skew;
            while remaining > 0 {
                let candidate = (0..m)
                    .filter(|&i| a[i] > 0)
                    .max_by(|&i, &j| lex_order(comparator, &seqs[i][a[i] - 1], i, &seqs[j][a[j] - 1], j));
                let Some(source) = candidate else { break };
                a[source] -= n + 1;
                b[source] -= n + 1;
                remaining -= 1;
            }
        }
    }

    a
}

fn partition_point_lex<T, C: Comparator<T>>(seq: &[T], value: &T, value_idx: usize, seq_idx: usize, comparator: &C) -> usize {
    let mut lo = 0;
    let mut hi = seq.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if lex_order(comparator, &seq[mid], seq_idx, value, value_idx) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Approximate splitter: samples `samples_per_seq` evenly-spaced elements
/// from each sequence, estimates a split value from the combined sample at
/// the requested rank's fraction, then binary-searches each sequence for
/// that value (breaking ties the same lexicographic way as
/// `multiseq_partition`, so the result is always a consistent partition of
/// the concatenated input).
pub fn sampling_partition<T: Clone, C: Comparator<T>>(
    seqs: &[&[T]],
    rank: usize,
    samples_per_seq: usize,
    comparator: &C,
) -> Vec<usize> {
    let m = seqs.len();
    assert!(m > 0, "sampling_partition requires at least one sequence");
    let total: usize = seqs.iter().map(|s| s.len()).sum();
    if rank >= total {
        return seqs.iter().map(|s| s.len()).collect();
    }

    let mut samples: Vec<(T, usize)> = Vec::new();
    for (i, seq) in seqs.iter().enumerate() {
        let len = seq.len();
        if len == 0 {
            continue;
        }
        let s = samples_per_seq.min(len).max(1);
        for t in 0..s {
            let pos = (t * len) / s;
            samples.push((seq[pos].clone(), i));
        }
    }

    let idx = ((rank as u128 * samples.len() as u128) / total as u128) as usize;
    let idx = idx.min(samples.len() - 1);
    samples.sort_by(|a, b| lex_order(comparator, &a.0, a.1, &b.0, b.1));
    let (candidate_value, candidate_idx) = &samples[idx];

    seqs.iter()
        .enumerate()
        .map(|(i, seq)| partition_point_lex(seq, candidate_value, *candidate_idx, i, comparator))
        .collect()
}
