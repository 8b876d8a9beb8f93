//! Per-user mean centering and construction of the user-keyed CSR.
//!
//! This is the preprocessing half of the user-based pipeline: the triplet
//! stream is folded into per-user means, and a second pass fills the CSR
//! with `r - mean(u)` stored as float32.

use crate::csr::Csr;
use crate::error::{Result, SimError};

/// One (user, item, rating) observation.
pub type Triplet = (u32, u32, f64);

#[derive(Debug)]
pub struct CenteredMatrix {
    pub csr: Csr,
    pub means: Vec<f64>,
}

/// Builds per-user means and the user-centered CSR from triplets sorted by user.
///
/// Shape is derived from the data: U and I are one past the largest user and
/// item id seen. Users without ratings get mean 0 and an empty row.
pub fn center_by_user(triplets: &[Triplet]) -> Result<CenteredMatrix> {
    let mut num_users = 0usize;
    let mut num_items = 0usize;
    let mut last_user: Option<u32> = None;
    for &(user, item, _) in triplets {
        if let Some(last) = last_user {
            if user < last {
                return Err(SimError::InvalidParameter(
                    "triplets must be sorted by user for centering".to_string(),
                ));
            }
        }
        last_user = Some(user);
        num_users = num_users.max(user as usize + 1);
        num_items = num_items.max(item as usize + 1);
    }

    let mut sums = vec![0.0f64; num_users];
    let mut counts = vec![0u32; num_users];
    for &(user, _, rating) in triplets {
        sums[user as usize] += rating;
        counts[user as usize] += 1;
    }

    let means: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(&sum, &count)| if count > 0 { sum / count as f64 } else { 0.0 })
        .collect();

    let mut indptr = Vec::with_capacity(num_users + 1);
    let mut indices = Vec::with_capacity(triplets.len());
    let mut data = Vec::with_capacity(triplets.len());

    indptr.push(0i64);
    let mut current_user = 0u32;
    for &(user, item, rating) in triplets {
        while current_user < user {
            indptr.push(indices.len() as i64);
            current_user += 1;
        }
        indices.push(item as i32);
        data.push((rating - means[user as usize]) as f32);
    }
    while (current_user as usize) < num_users {
        indptr.push(indices.len() as i64);
        current_user += 1;
    }

    let csr = Csr::new(indptr, indices, data, num_items)?;
    Ok(CenteredMatrix { csr, means })
}
