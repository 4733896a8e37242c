//! Reviewer candidate filtering and sampling.
//!
//! Pure functions: no I/O, randomness comes from the caller's `Rng`.

use crate::models::User;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

/// Drop every user whose id is in `exclude_ids`, keeping the input order.
pub fn exclude_candidates(users: Vec<User>, exclude_ids: &[&str]) -> Vec<User> {
    if exclude_ids.is_empty() {
        return users;
    }

    let excluded: HashSet<&str> = exclude_ids.iter().copied().collect();
    users
        .into_iter()
        .filter(|user| !excluded.contains(user.user_id.as_str()))
        .collect()
}

/// Pick up to `quantity` distinct reviewer ids from `candidates`.
///
/// A non-positive quantity or an empty candidate list yields nothing. When
/// `quantity` covers every candidate, all ids are returned in input order.
/// Otherwise the candidate indices are shuffled and the first `quantity` taken.
pub fn sample_reviewers<R: Rng + ?Sized>(
    candidates: &[User],
    quantity: i64,
    rng: &mut R,
) -> Vec<String> {
    if candidates.is_empty() || quantity <= 0 {
        return Vec::new();
    }

    let quantity = usize::try_from(quantity).unwrap_or(usize::MAX);
    if quantity >= candidates.len() {
        return candidates.iter().map(|u| u.user_id.clone()).collect();
    }

    let mut indices: Vec<usize> = (0..candidates.len()).collect();
    indices.shuffle(rng);

    indices
        .into_iter()
        .take(quantity)
        .map(|i| candidates[i].user_id.clone())
        .collect()
}
