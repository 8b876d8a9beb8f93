//! ## SimSim - fast neighborhood-based similarity indexing on the command line.
//!
//! **Simsim** computes, for every user or item of a sparse ratings matrix, the
//! top-K most similar other users or items ('people with this taste also have
//! that taste') under cosine, Pearson or Jaccard similarity. It is a command
//! line tool that consumes either a triplet CSV of `(user, item, rating)`
//! observations or a prebuilt compressed-sparse-row matrix, and writes the
//! neighbor lists as CSV together with a run report.
//!
//! The heavy lifting happens in a concurrent pair accumulator: baskets of
//! co-rated neighbors flow over a bounded channel into a fixed pool of
//! workers that fold pairwise statistics into a sharded global map. A
//! single-threaded pass then scores every pair, applies support and
//! shrinkage filters, and keeps a bounded top-K per row.
//!
//! # Examples
//!
//! Basic programmatic usage:
//!
//! ```
//! use simsim::measures::CosineStats;
//! use simsim::shard::{accumulate, ShardBy, ShardedPairMap};
//! use simsim::topk::{select_top_k, SelectParams};
//!
//! /* Three users rated three items; each basket lists the (item, rating)
//!    pairs of one user, so every basket contributes the item pairs that
//!    user co-rated. */
//! let baskets = vec![
//!     vec![(0, 5.0), (1, 3.0)],
//!     vec![(0, 4.0), (2, 2.0)],
//!     vec![(1, 1.0), (2, 5.0)],
//! ];
//!
//! /* Fold all pairwise statistics into the sharded accumulator with a
//!    small worker pool. */
//! let map = ShardedPairMap::<CosineStats>::new(4, ShardBy::Pair);
//! let stats = accumulate(std::iter::once(Ok(baskets)), &map, 2).unwrap();
//! assert_eq!(stats.baskets, 3);
//!
//! /* Score the pairs and keep the two best neighbors per item. */
//! let params = SelectParams { k: 2, min_co: 1, shrink: 0.0 };
//! let (lists, _) = select_top_k(&map, 3, &params, |_, _, s| s.score());
//!
//! /* Every pair here is perfectly aligned, so item 0 is flanked by both
//!    other items at cosine 1.0, ordered by ascending id on the tie. */
//! assert_eq!(lists[0].len(), 2);
//! assert_eq!(lists[0][0].id, 1);
//! assert_eq!(lists[0][1].id, 2);
//! ```

/**
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

pub mod center;
pub mod csr;
pub mod error;
pub mod invert;
pub mod io;
pub mod measures;
pub mod predict;
pub mod run;
pub mod sampling;
pub mod shard;
pub mod topk;
pub mod types;

mod pipeline_tests;

pub use error::{Result, SimError};
pub use measures::Measure;
pub use run::{run, Mode, RunConfig, RunReport};
