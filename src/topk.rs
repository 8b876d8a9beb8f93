/*
 * SimSim
 * Copyright (C) 2024 The SimSim developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

//! Scoring and bounded top-K selection over the accumulated pairs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::measures::PairStats;
use crate::shard::ShardedPairMap;

/// One neighbor candidate of a row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredNeighbor {
    pub id: u32,
    pub score: f64,
}

/// Reversed ordering so a max-heap keeps the worst retained candidate on
/// top. There is no total order on floats, so score ties (and incomparable
/// scores) fall back to the neighbor id, which makes selection total: equal
/// scores evict the larger id first.
fn cmp_reverse(neighbor_a: &ScoredNeighbor, neighbor_b: &ScoredNeighbor) -> Ordering {
    match neighbor_a.score.partial_cmp(&neighbor_b.score) {
        Some(Ordering::Less) => Ordering::Greater,
        Some(Ordering::Greater) => Ordering::Less,
        _ => neighbor_a.id.cmp(&neighbor_b.id),
    }
}

impl Eq for ScoredNeighbor {}

impl Ord for ScoredNeighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_reverse(self, other)
    }
}

impl PartialOrd for ScoredNeighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(cmp_reverse(self, other))
    }
}

/// A bounded best-K collection over the reversed ordering.
pub struct TopK {
    heap: BinaryHeap<ScoredNeighbor>,
    k: usize,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        TopK {
            heap: BinaryHeap::with_capacity(k),
            k,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn offer(&mut self, candidate: ScoredNeighbor) {
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(mut top) = self.heap.peek_mut() {
            if candidate < *top {
                *top = candidate;
            }
        }
    }

    /// Best first: descending score, ascending neighbor id on ties.
    pub fn into_sorted(self) -> Vec<ScoredNeighbor> {
        self.heap.into_sorted_vec()
    }
}

/// Filters applied while folding accumulator entries into candidates.
#[derive(Debug, Clone, Copy)]
pub struct SelectParams {
    pub k: usize,
    pub min_co: u32,
    pub shrink: f64,
}

/// Aggregate outcome of the scoring pass. Degenerate pairs are dropped
/// silently and only counted here, never logged per occurrence.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SelectCounts {
    pub dropped_support: u64,
    pub dropped_degenerate: u64,
    pub dropped_non_positive: u64,
    pub retained: u64,
}

/// Folds the accumulator into per-row neighbor lists.
///
/// Runs single-threaded after the pool joined, shard by shard, which fixes
/// the candidate visit order given the map state. Per entry: support
/// threshold, measure score (None means a degenerate denominator or a
/// non-finite quotient), strict positivity, shrinkage `n / (n + λ)`, then a
/// symmetric offer to both endpoints.
pub fn select_top_k<S: PairStats>(
    map: &ShardedPairMap<S>,
    num_rows: usize,
    params: &SelectParams,
    score: impl Fn(u32, u32, &S) -> Option<f64>,
) -> (Vec<Vec<ScoredNeighbor>>, SelectCounts) {
    let mut rows: Vec<TopK> = (0..num_rows).map(|_| TopK::new(params.k)).collect();
    let mut counts = SelectCounts::default();

    map.for_each(|lower, higher, stats| {
        if stats.count() < params.min_co {
            counts.dropped_support += 1;
            return;
        }
        let sim = match score(lower, higher, stats) {
            Some(sim) => sim,
            None => {
                counts.dropped_degenerate += 1;
                return;
            }
        };
        if sim <= 0.0 {
            counts.dropped_non_positive += 1;
            return;
        }
        let sim = if params.shrink > 0.0 {
            let support = stats.count() as f64;
            sim * (support / (support + params.shrink))
        } else {
            sim
        };
        rows[lower as usize].offer(ScoredNeighbor { id: higher, score: sim });
        rows[higher as usize].offer(ScoredNeighbor { id: lower, score: sim });
    });

    let lists: Vec<Vec<ScoredNeighbor>> = rows.into_iter().map(TopK::into_sorted).collect();
    counts.retained = lists.iter().map(|list| list.len() as u64).sum();
    (lists, counts)
}
