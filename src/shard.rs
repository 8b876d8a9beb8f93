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

//! The concurrent pair accumulator: a sharded global map fed by a bounded
//! worker pool.
//!
//! Workers write straight into the shards instead of building local maps
//! that get merged at the end; per-worker maps multiply peak memory by the
//! pool size for hot items and leave a serial merge behind. Each shard is a
//! mutex around a two-level fnv map, and the pair is canonicalised to
//! (min, max) with the value roles swapped in lockstep before the lock is
//! taken, so both directions of a pair fold into the same entry no matter
//! which worker saw the basket first.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::thread;

use fnv::FnvHashMap;

use crate::error::{Result, SimError};
use crate::measures::PairStats;
use crate::types::{BasketChunk, PairTable};

/// Default shard count; a power of two so the shard index is a mask.
pub const DEFAULT_SHARDS: usize = 64;

/// Bookkeeping bytes per pair entry on top of the statistics payload (hash
/// buckets, keys, load-factor slack), used for the memory-ceiling estimate.
const ENTRY_OVERHEAD: usize = 48;

/// How the shard index is derived from a canonical pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardBy {
    /// Hash both ids; spreads a hot outer key over all locks.
    Pair,
    /// Hash the outer (lower) id only; keeps each outer key on one shard.
    Outer,
}

pub struct ShardedPairMap<S> {
    shards: Vec<Mutex<PairTable<S>>>,
    mask: u64,
    shard_by: ShardBy,
    entries: AtomicUsize,
    max_entries: usize,
    ceiling: usize,
}

impl<S: PairStats> ShardedPairMap<S> {
    pub fn new(num_shards: usize, shard_by: ShardBy) -> Self {
        Self::with_ceiling(num_shards, shard_by, 0)
    }

    /// A map that refuses to grow past `ceiling` bytes of estimated
    /// residency; `ceiling == 0` disables the check.
    pub fn with_ceiling(num_shards: usize, shard_by: ShardBy, ceiling: usize) -> Self {
        let num_shards = num_shards.max(1).next_power_of_two();
        let footprint = mem::size_of::<S>() + mem::size_of::<u32>() + ENTRY_OVERHEAD;
        let max_entries = if ceiling == 0 {
            usize::MAX
        } else {
            ceiling / footprint
        };
        ShardedPairMap {
            shards: (0..num_shards).map(|_| Mutex::new(FnvHashMap::default())).collect(),
            mask: (num_shards - 1) as u64,
            shard_by,
            entries: AtomicUsize::new(0),
            max_entries,
            ceiling,
        }
    }

    fn shard_index(&self, lower: u32, higher: u32) -> usize {
        let hash = match self.shard_by {
            ShardBy::Pair => (lower as u64)
                .wrapping_mul(0x9e37_79b9_7f4a_7c15)
                ^ (higher as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f),
            ShardBy::Outer => (lower as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15),
        };
        ((hash >> 32) & self.mask) as usize
    }

    /// Folds one co-observation of the unordered pair {id_a, id_b} into its
    /// entry. The id/value swap happens before the lock so `x` statistics
    /// always belong to the lower-id member.
    pub fn update(&self, id_a: u32, value_a: f64, id_b: u32, value_b: f64) -> Result<()> {
        debug_assert_ne!(id_a, id_b);
        let (lower, higher, x, y) = if id_a < id_b {
            (id_a, id_b, value_a, value_b)
        } else {
            (id_b, id_a, value_b, value_a)
        };

        let shard = &self.shards[self.shard_index(lower, higher)];
        let mut table = shard.lock().unwrap();
        let row = table.entry(lower).or_default();
        match row.entry(higher) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().observe(x, y);
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                let entries = self.entries.fetch_add(1, Ordering::Relaxed) + 1;
                if entries > self.max_entries {
                    return Err(SimError::MemoryCeilingExceeded {
                        ceiling: self.ceiling,
                        entries,
                    });
                }
                let mut stats = S::default();
                stats.observe(x, y);
                slot.insert(stats);
            }
        }
        Ok(())
    }

    /// Number of distinct pairs accumulated so far.
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Visits every accumulated pair, taking one shard lock at a time.
    /// Meant for the single-threaded finalisation after the pool joined.
    pub fn for_each(&self, mut visit: impl FnMut(u32, u32, &S)) {
        for shard in &self.shards {
            let table = shard.lock().unwrap();
            for (&lower, row) in table.iter() {
                for (&higher, stats) in row.iter() {
                    visit(lower, higher, stats);
                }
            }
        }
    }
}

/// Counters aggregated from the accumulation pool at join time.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccumulateStats {
    pub baskets: u64,
    pub pair_updates: u64,
}

/// Drains `chunks` through a pool of `workers` threads writing into `map`.
///
/// Exactly one producer (the calling thread) feeds a bounded channel with
/// capacity O(W); workers block on the empty channel, the producer blocks on
/// a full one. When the source is exhausted the channel closes, workers
/// drain and exit, and all of them are joined before this returns, so the
/// map can be read without locks afterwards. A worker that hits the memory
/// ceiling keeps draining the channel so the producer never wedges, and the
/// fault surfaces after the join.
pub fn accumulate<S, I>(chunks: I, map: &ShardedPairMap<S>, workers: usize) -> Result<AccumulateStats>
where
    S: PairStats,
    I: Iterator<Item = Result<BasketChunk>>,
{
    let workers = workers.max(1);
    let (sender, receiver) = sync_channel::<BasketChunk>(workers * 2);
    let receiver = Arc::new(Mutex::new(receiver));

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                scope.spawn(move || {
                    let mut stats = AccumulateStats::default();
                    let mut failure: Option<SimError> = None;
                    loop {
                        let received = {
                            let guard = receiver.lock().unwrap();
                            guard.recv()
                        };
                        let chunk = match received {
                            Ok(chunk) => chunk,
                            Err(_) => break,
                        };
                        if failure.is_some() {
                            continue;
                        }
                        for basket in &chunk {
                            stats.baskets += 1;
                            'pairs: for position_a in 0..basket.len() {
                                let (id_a, value_a) = basket[position_a];
                                for position_b in (position_a + 1)..basket.len() {
                                    let (id_b, value_b) = basket[position_b];
                                    if let Err(fault) = map.update(id_a, value_a, id_b, value_b) {
                                        failure = Some(fault);
                                        break 'pairs;
                                    }
                                    stats.pair_updates += 1;
                                }
                            }
                            if failure.is_some() {
                                break;
                            }
                        }
                    }
                    match failure {
                        Some(fault) => Err(fault),
                        None => Ok(stats),
                    }
                })
            })
            .collect();

        let mut producer_fault = None;
        for chunk in chunks {
            match chunk {
                Ok(chunk) => {
                    if sender.send(chunk).is_err() {
                        break;
                    }
                }
                Err(fault) => {
                    producer_fault = Some(fault);
                    break;
                }
            }
        }
        drop(sender);

        let mut totals = AccumulateStats::default();
        let mut worker_fault = None;
        for handle in handles {
            match handle.join().expect("accumulation worker panicked") {
                Ok(stats) => {
                    totals.baskets += stats.baskets;
                    totals.pair_updates += stats.pair_updates;
                }
                Err(fault) => {
                    if worker_fault.is_none() {
                        worker_fault = Some(fault);
                    }
                }
            }
        }

        if let Some(fault) = producer_fault {
            return Err(fault);
        }
        if let Some(fault) = worker_fault {
            return Err(fault);
        }
        Ok(totals)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measures::CosineStats;
    use crate::types::Basket;

    fn collect_pairs(map: &ShardedPairMap<CosineStats>) -> Vec<(u32, u32, f64, u32)> {
        let mut pairs = Vec::new();
        map.for_each(|lower, higher, stats| {
            pairs.push((lower, higher, stats.dot, stats.count));
        });
        pairs.sort_by_key(|&(lower, higher, _, _)| (lower, higher));
        pairs
    }

    #[test]
    fn both_directions_fold_into_one_entry() {
        let map = ShardedPairMap::<CosineStats>::new(4, ShardBy::Pair);
        map.update(3, 2.0, 7, 5.0).unwrap();
        map.update(7, 5.0, 3, 2.0).unwrap();

        let pairs = collect_pairs(&map);
        assert_eq!(pairs.len(), 1);
        let (lower, higher, dot, count) = pairs[0];
        assert_eq!((lower, higher), (3, 7));
        assert_eq!(dot, 20.0);
        assert_eq!(count, 2);
    }

    #[test]
    fn role_swap_tracks_the_id_swap() {
        let map = ShardedPairMap::<CosineStats>::new(4, ShardBy::Pair);
        map.update(9, 4.0, 2, 1.0).unwrap();

        map.for_each(|lower, higher, stats| {
            assert_eq!((lower, higher), (2, 9));
            // x belongs to id 2 (value 1.0), y to id 9 (value 4.0).
            assert_eq!(stats.x2, 1.0);
            assert_eq!(stats.y2, 16.0);
        });
    }

    #[test]
    fn shard_count_rounds_up_to_a_power_of_two() {
        let map = ShardedPairMap::<CosineStats>::new(33, ShardBy::Pair);
        assert_eq!(map.num_shards(), 64);
    }

    #[test]
    fn outer_sharding_pins_an_outer_key_to_one_shard() {
        let map = ShardedPairMap::<CosineStats>::new(16, ShardBy::Outer);
        let expected = map.shard_index(5, 6);
        for higher in 7..200 {
            assert_eq!(map.shard_index(5, higher), expected);
        }
    }

    #[test]
    fn pool_matches_single_threaded_reference() {
        // Dense synthetic baskets over 50 ids so every worker interleaving
        // touches contended entries. 17 and 50 are coprime, so the ten slots
        // of a basket carry distinct ids.
        // Integer-valued contributions keep every partial sum exact, so the
        // concurrent result is bitwise comparable to the reference.
        let baskets: Vec<Basket> = (0..200u32)
            .map(|basket| {
                (0..10u32)
                    .map(|slot| ((basket + slot * 17) % 50, 1.0 + slot as f64))
                    .collect()
            })
            .collect();

        let reference = ShardedPairMap::<CosineStats>::new(1, ShardBy::Pair);
        for basket in &baskets {
            for a in 0..basket.len() {
                for b in (a + 1)..basket.len() {
                    reference
                        .update(basket[a].0, basket[a].1, basket[b].0, basket[b].1)
                        .unwrap();
                }
            }
        }

        let concurrent = ShardedPairMap::<CosineStats>::new(8, ShardBy::Pair);
        let chunks = baskets
            .chunks(16)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect::<Vec<_>>();
        let stats = accumulate(chunks.into_iter(), &concurrent, 4).unwrap();

        assert_eq!(stats.baskets, 200);
        assert_eq!(stats.pair_updates, 200 * 45);
        assert_eq!(collect_pairs(&concurrent), collect_pairs(&reference));
    }

    #[test]
    fn memory_ceiling_fails_the_run() {
        // Room for only a handful of entries.
        let map = ShardedPairMap::<CosineStats>::with_ceiling(4, ShardBy::Pair, 256);
        let baskets: Vec<Basket> = vec![(0..40).map(|id| (id, 1.0)).collect()];

        let fault = accumulate(vec![Ok(baskets)].into_iter(), &map, 2).unwrap_err();
        assert!(matches!(fault, SimError::MemoryCeilingExceeded { .. }));
    }

    #[test]
    fn producer_fault_propagates() {
        let map = ShardedPairMap::<CosineStats>::new(4, ShardBy::Pair);
        let chunks = vec![
            Ok(vec![vec![(0, 1.0), (1, 1.0)]]),
            Err(SimError::InvalidParameter("broken stream".to_string())),
        ];

        let fault = accumulate(chunks.into_iter(), &map, 2).unwrap_err();
        assert!(matches!(fault, SimError::InvalidParameter(_)));
    }

    #[test]
    fn empty_source_yields_empty_map() {
        let map = ShardedPairMap::<CosineStats>::new(4, ShardBy::Pair);
        let stats = accumulate(std::iter::empty::<Result<BasketChunk>>(), &map, 2).unwrap();
        assert_eq!(stats.baskets, 0);
        assert!(map.is_empty());
    }
}
