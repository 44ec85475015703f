//! Annotator selection for task assignment.

use crate::error::{Result, StoreError};
use rand::Rng;
use rand::seq::IndexedRandom;

/// Pick `num_required` distinct annotators at random (fewer if the pool is
/// smaller). Repeated names in the pool count once.
pub fn select_annotators<R: Rng + ?Sized>(
    pool: &[String],
    num_required: usize,
    rng: &mut R,
) -> Result<Vec<String>> {
    let mut distinct: Vec<&String> = Vec::with_capacity(pool.len());
    for name in pool {
        if !distinct.contains(&name) {
            distinct.push(name);
        }
    }
    if distinct.is_empty() {
        return Err(StoreError::EmptyAnnotatorPool);
    }

    let count = num_required.min(distinct.len());
    Ok(distinct
        .choose_multiple(rng, count)
        .map(|name| (*name).clone())
        .collect())
}

/// Split a comma separated pool (`a, b,c`), dropping empty entries.
pub fn parse_pool(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
