//! Deterministic percentage sampling of user and item identifiers.
//!
//! Sampling must produce the same subset on every run and platform, so the
//! admission decision is a pure function of the identifier and the
//! percentage, with no seed and no process state.

/// 32-bit FNV-1a over the four little-endian bytes of `x`.
pub fn hash32(x: u32) -> u32 {
    let mut h: u32 = 2166136261;
    for k in 0..4 {
        h ^= (x >> (8 * k)) & 0xff;
        h = h.wrapping_mul(16777619);
    }
    h
}

/// Admit `id` iff its hash falls into the first `pct` of 100 buckets.
///
/// `pct >= 100` admits everything, `pct == 0` admits nothing. Applied
/// independently to user and item ids, so the sampled subgraph is the
/// Cartesian restriction of both subsets.
pub fn keep_by_pct(id: u32, pct: u32) -> bool {
    if pct >= 100 {
        return true;
    }
    if pct == 0 {
        return false;
    }
    hash32(id) % 100 < pct
}
