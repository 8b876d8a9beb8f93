//! Hold-out evaluation of rating prediction from a neighbor CSV.
//!
//! A fraction of each user's ratings is held out, the rest stays as train
//! data, and the held-out ratings are predicted from the precomputed
//! neighbor lists. The split is seeded so evaluations are reproducible.

use fnv::FnvHashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::types::NeighborLists;

/// Ratings live on the half-star scale; predictions are clamped into it.
pub const RATING_MIN: f64 = 0.5;
pub const RATING_MAX: f64 = 5.0;

/// Which neighbor lists drive the prediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredictModel {
    /// User neighbors; predicts deviations from user means.
    UserBased,
    /// Item neighbors; predicts from the user's own train ratings.
    ItemBased,
}

impl PredictModel {
    pub fn parse(name: &str) -> Option<PredictModel> {
        match name {
            "user" => Some(PredictModel::UserBased),
            "item" => Some(PredictModel::ItemBased),
            _ => None,
        }
    }
}

pub struct Holdout {
    /// Per-user train ratings: item -> rating.
    pub train: Vec<FnvHashMap<u32, f64>>,
    /// Held-out (user, item, rating) observations.
    pub test: Vec<(u32, u32, f64)>,
}

/// Splits each user's ratings into train and test, keeping at least one
/// rating in train. Users with a single rating contribute nothing to test.
pub fn holdout_split(
    triplets: &[(u32, u32, f64)],
    num_users: usize,
    test_ratio: f64,
    seed: u64,
) -> Holdout {
    let mut by_user: Vec<Vec<(u32, f64)>> = vec![Vec::new(); num_users];
    for &(user, item, rating) in triplets {
        by_user[user as usize].push((item, rating));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train: Vec<FnvHashMap<u32, f64>> = vec![FnvHashMap::default(); num_users];
    let mut test = Vec::new();

    for (user, mut ratings) in by_user.into_iter().enumerate() {
        if ratings.is_empty() {
            continue;
        }
        ratings.shuffle(&mut rng);
        let mut held_out = ((test_ratio * ratings.len() as f64).round() as usize).max(1);
        if held_out > ratings.len() - 1 {
            held_out = ratings.len() - 1;
        }
        for (position, (item, rating)) in ratings.into_iter().enumerate() {
            if position < held_out {
                test.push((user as u32, item, rating));
            } else {
                train[user].insert(item, rating);
            }
        }
    }

    Holdout { train, test }
}

#[derive(Debug, Clone, Copy)]
pub struct EvalResult {
    pub mae: f64,
    pub rmse: f64,
    pub evaluated: usize,
}

/// Predicts every held-out rating and folds the errors into MAE and RMSE.
/// `means` is consulted for the user-based model only.
pub fn evaluate(
    model: PredictModel,
    holdout: &Holdout,
    neighbors: &NeighborLists,
    means: &[f64],
    k_eval: usize,
) -> EvalResult {
    let (abs_sum, square_sum, evaluated) = holdout
        .test
        .par_iter()
        .map(|&(user, item, rating)| {
            let predicted = match model {
                PredictModel::UserBased => predict_user_based(user, item, holdout, neighbors, means, k_eval),
                PredictModel::ItemBased => predict_item_based(user, item, holdout, neighbors, k_eval),
            };
            let error = rating - predicted;
            (error.abs(), error * error, 1usize)
        })
        .reduce(
            || (0.0, 0.0, 0),
            |left, right| (left.0 + right.0, left.1 + right.1, left.2 + right.2),
        );

    if evaluated == 0 {
        return EvalResult {
            mae: 0.0,
            rmse: 0.0,
            evaluated,
        };
    }
    EvalResult {
        mae: abs_sum / evaluated as f64,
        rmse: (square_sum / evaluated as f64).sqrt(),
        evaluated,
    }
}

fn neighbors_of<'a>(
    neighbors: &'a NeighborLists,
    id: u32,
    k_eval: usize,
) -> &'a [(u32, f64)] {
    let list = match neighbors.get(&id) {
        Some(list) => list.as_slice(),
        None => &[],
    };
    if k_eval > 0 && list.len() > k_eval {
        &list[..k_eval]
    } else {
        list
    }
}

/// `mean(u) + Σ w·(r_v − mean(v)) / Σ|w|` over the neighbors of `user` that
/// rated `item` in train; falls back to the user's mean.
fn predict_user_based(
    user: u32,
    item: u32,
    holdout: &Holdout,
    neighbors: &NeighborLists,
    means: &[f64],
    k_eval: usize,
) -> f64 {
    let user_mean = means.get(user as usize).copied().unwrap_or(0.0);

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for &(neighbor, weight) in neighbors_of(neighbors, user, k_eval) {
        if let Some(train) = holdout.train.get(neighbor as usize) {
            if let Some(&neighbor_rating) = train.get(&item) {
                let neighbor_mean = means.get(neighbor as usize).copied().unwrap_or(0.0);
                numerator += weight * (neighbor_rating - neighbor_mean);
                denominator += weight.abs();
            }
        }
    }

    let predicted = if denominator == 0.0 {
        user_mean
    } else {
        user_mean + numerator / denominator
    };
    predicted.clamp(RATING_MIN, RATING_MAX)
}

/// `Σ w·r_uj / Σ|w|` over the neighbors of `item` that `user` rated in
/// train; falls back to the mean of the user's train ratings.
fn predict_item_based(
    user: u32,
    item: u32,
    holdout: &Holdout,
    neighbors: &NeighborLists,
    k_eval: usize,
) -> f64 {
    let train = &holdout.train[user as usize];

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for &(neighbor, weight) in neighbors_of(neighbors, item, k_eval) {
        if let Some(&rated) = train.get(&neighbor) {
            numerator += weight * rated;
            denominator += weight.abs();
        }
    }

    let predicted = if denominator == 0.0 {
        if train.is_empty() {
            3.0
        } else {
            train.values().sum::<f64>() / train.len() as f64
        }
    } else {
        numerator / denominator
    };
    predicted.clamp(RATING_MIN, RATING_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor_lists(entries: &[(u32, &[(u32, f64)])]) -> NeighborLists {
        let mut lists = NeighborLists::default();
        for (id, list) in entries {
            lists.insert(*id, list.to_vec());
        }
        lists
    }

    #[test]
    fn split_keeps_at_least_one_training_rating() {
        let triplets: Vec<(u32, u32, f64)> = (0..10).map(|item| (0, item, 4.0)).collect();
        let holdout = holdout_split(&triplets, 1, 0.2, 7);

        assert_eq!(holdout.test.len(), 2);
        assert_eq!(holdout.train[0].len(), 8);
    }

    #[test]
    fn split_is_reproducible_for_a_seed() {
        let triplets: Vec<(u32, u32, f64)> =
            (0..20).map(|item| (item % 4, item, 3.0)).collect();

        let first = holdout_split(&triplets, 4, 0.25, 99);
        let second = holdout_split(&triplets, 4, 0.25, 99);
        assert_eq!(first.test, second.test);
    }

    #[test]
    fn singleton_users_stay_in_train() {
        let holdout = holdout_split(&[(0, 5, 4.0)], 1, 0.5, 1);
        assert!(holdout.test.is_empty());
        assert_eq!(holdout.train[0][&5], 4.0);
    }

    #[test]
    fn user_based_prediction_weights_mean_deviations() {
        // User 0's only neighbor is user 1 with weight 1.0; user 1 rated the
        // held-out item 0.5 above their mean.
        let mut train = vec![FnvHashMap::default(), FnvHashMap::default()];
        train[1].insert(7, 4.0);
        let holdout = Holdout {
            train,
            test: vec![(0, 7, 4.0)],
        };
        let neighbors = neighbor_lists(&[(0, &[(1, 1.0)])]);
        let means = vec![3.0, 3.5];

        let result = evaluate(PredictModel::UserBased, &holdout, &neighbors, &means, 0);
        // Prediction 3.0 + 0.5 = 3.5 against actual 4.0.
        assert_eq!(result.evaluated, 1);
        assert!((result.mae - 0.5).abs() < 1e-12);
    }

    #[test]
    fn user_based_falls_back_to_the_user_mean() {
        let holdout = Holdout {
            train: vec![FnvHashMap::default()],
            test: vec![(0, 7, 4.0)],
        };
        let neighbors = NeighborLists::default();
        let means = vec![3.25];

        let result = evaluate(PredictModel::UserBased, &holdout, &neighbors, &means, 0);
        assert!((result.mae - 0.75).abs() < 1e-12);
    }

    #[test]
    fn item_based_prediction_averages_rated_neighbors() {
        let mut train = vec![FnvHashMap::default()];
        train[0].insert(1, 4.0);
        train[0].insert(2, 2.0);
        let holdout = Holdout {
            train,
            test: vec![(0, 0, 3.0)],
        };
        // Item 0's neighbors: item 1 (weight 1.0) and item 2 (weight 1.0).
        let neighbors = neighbor_lists(&[(0, &[(1, 1.0), (2, 1.0)])]);

        let result = evaluate(PredictModel::ItemBased, &holdout, &neighbors, &[], 0);
        // Prediction (4 + 2) / 2 = 3 matches the actual rating.
        assert!(result.mae.abs() < 1e-12);
        assert!(result.rmse.abs() < 1e-12);
    }

    #[test]
    fn k_eval_truncates_the_neighbor_list() {
        let mut train = vec![FnvHashMap::default()];
        train[0].insert(1, 5.0);
        train[0].insert(2, 1.0);
        let holdout = Holdout {
            train,
            test: vec![(0, 0, 5.0)],
        };
        let neighbors = neighbor_lists(&[(0, &[(1, 1.0), (2, 1.0)])]);

        // With only the first neighbor considered, the prediction is 5.0.
        let result = evaluate(PredictModel::ItemBased, &holdout, &neighbors, &[], 1);
        assert!(result.mae.abs() < 1e-12);
    }

    #[test]
    fn predictions_clamp_into_the_rating_scale() {
        let mut train = vec![FnvHashMap::default(), FnvHashMap::default()];
        train[1].insert(0, 5.0);
        let holdout = Holdout {
            train,
            test: vec![(0, 0, 5.0)],
        };
        let neighbors = neighbor_lists(&[(0, &[(1, 1.0)])]);
        let means = vec![5.0, 0.0];

        let result = evaluate(PredictModel::UserBased, &holdout, &neighbors, &means, 0);
        // Raw prediction 5.0 + (5.0 - 0.0) = 10.0, clamped to 5.0.
        assert!(result.mae.abs() < 1e-12);
    }

    #[test]
    fn empty_test_set_reports_zero() {
        let holdout = Holdout {
            train: vec![FnvHashMap::default()],
            test: Vec::new(),
        };
        let result = evaluate(
            PredictModel::ItemBased,
            &holdout,
            &NeighborLists::default(),
            &[],
            0,
        );
        assert_eq!(result.evaluated, 0);
        assert_eq!(result.mae, 0.0);
    }
}
