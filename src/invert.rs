//! Transposes the user-keyed CSR into item-keyed baskets.
//!
//! User-user similarity needs, for every item, the users who rated it; this
//! is the inverted view of the loaded matrix restricted to the sampled
//! subgraph. The whole inversion fits in memory because it is the same data
//! as the CSR, re-bucketed.

use crate::csr::Csr;
use crate::sampling::keep_by_pct;
use crate::types::Basket;

/// Item-keyed adjacency of the sampled subgraph.
pub struct InvertedIndex {
    /// For each item, the (user, value) entries that survived sampling.
    pub baskets: Vec<Basket>,
    /// Sampled degree per user: how many of their items were retained.
    pub degrees: Vec<u32>,
    /// Total (user, item) entries retained.
    pub entries: u64,
}

pub fn invert_user_csr(csr: &Csr, pct_users: u32, pct_items: u32) -> InvertedIndex {
    let num_users = csr.num_rows();
    let mut baskets: Vec<Basket> = vec![Vec::new(); csr.num_cols()];
    let mut degrees = vec![0u32; num_users];
    let mut entries = 0u64;

    for user in 0..num_users {
        if !keep_by_pct(user as u32, pct_users) {
            continue;
        }
        let (columns, values) = csr.row(user);
        for (&item, &value) in columns.iter().zip(values) {
            if !keep_by_pct(item as u32, pct_items) {
                continue;
            }
            baskets[item as usize].push((user as u32, value as f64));
            degrees[user] += 1;
            entries += 1;
        }
    }

    InvertedIndex {
        baskets,
        degrees,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mini_centered_csr() -> Csr {
        // The user-centered mini example: means 4, 3, 3.
        Csr::new(
            vec![0, 2, 4, 6],
            vec![0, 1, 0, 2, 1, 2],
            vec![1.0, -1.0, 1.0, -1.0, -2.0, 2.0],
            3,
        )
        .unwrap()
    }

    #[test]
    fn inversion_buckets_users_under_their_items() {
        let inverted = invert_user_csr(&mini_centered_csr(), 100, 100);

        assert_eq!(inverted.baskets.len(), 3);
        assert_eq!(inverted.baskets[0], vec![(0, 1.0), (1, 1.0)]);
        assert_eq!(inverted.baskets[1], vec![(0, -1.0), (2, -2.0)]);
        assert_eq!(inverted.baskets[2], vec![(1, -1.0), (2, 2.0)]);
        assert_eq!(inverted.degrees, vec![2, 2, 2]);
        assert_eq!(inverted.entries, 6);
    }

    #[test]
    fn zero_percent_sampling_empties_the_index() {
        let inverted = invert_user_csr(&mini_centered_csr(), 0, 100);
        assert!(inverted.baskets.iter().all(|basket| basket.is_empty()));
        assert_eq!(inverted.degrees, vec![0, 0, 0]);
        assert_eq!(inverted.entries, 0);

        let inverted = invert_user_csr(&mini_centered_csr(), 100, 0);
        assert_eq!(inverted.entries, 0);
    }

    #[test]
    fn degrees_track_only_sampled_items() {
        // pct_items=50 keeps item 0 (bucket 5) and item 2 (bucket 23),
        // drops item 1 (bucket 92).
        let inverted = invert_user_csr(&mini_centered_csr(), 100, 50);

        assert!(!inverted.baskets[0].is_empty());
        assert!(inverted.baskets[1].is_empty());
        assert!(!inverted.baskets[2].is_empty());
        assert_eq!(inverted.degrees, vec![1, 2, 1]);
    }
}
