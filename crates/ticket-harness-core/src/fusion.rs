//! Reciprocal Rank Fusion.
//!
//! Combines independently-scaled rankings (BM25, cosine) without
//! normalizing their raw scores. A fragment at 0-based rank `r` in a list
//! contributes `1 / (k + r + 1)`; contributions are summed across lists.
//!
//! Identity is the [`FragmentKey`], so the same logical fragment found by
//! both retrievers is recognised as one candidate.

use std::collections::HashMap;

use crate::models::{FragmentKey, FusedRanking, ScoredResult};

/// Standard RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Fused `(key, score)` pairs, best first.
///
/// Ties keep the order in which keys were first encountered, scanning the
/// lists in the order given.
pub fn fused_scores(lists: &[&[ScoredResult]], k: f64) -> Vec<(FragmentKey, f64)> {
    let mut order: Vec<(FragmentKey, f64)> = Vec::new();
    let mut position: HashMap<&FragmentKey, usize> = HashMap::new();

    for list in lists {
        for (rank, result) in list.iter().enumerate() {
            let contribution = 1.0 / (k + rank as f64 + 1.0);
            match position.get(&result.key) {
                Some(&idx) => order[idx].1 += contribution,
                None => {
                    position.insert(&result.key, order.len());
                    order.push((result.key.clone(), contribution));
                }
            }
        }
    }

    order.sort_by(|a, b| b.1.total_cmp(&a.1));
    order
}

/// Fuse ranked lists into a single score-free ordering.
pub fn reciprocal_rank_fusion(lists: &[&[ScoredResult]], k: f64) -> FusedRanking {
    FusedRanking(
        fused_scores(lists, k)
            .into_iter()
            .map(|(key, _)| key)
            .collect(),
    )
}

/// Rejoin a fused ranking with the per-algorithm results it came from.
///
/// Returns at most `limit` results in fused order. When a key appears in
/// more than one list, the entry from the later list is used.
pub fn resolve(
    ranking: &FusedRanking,
    lists: &[&[ScoredResult]],
    limit: usize,
) -> Vec<ScoredResult> {
    let mut by_key: HashMap<&FragmentKey, &ScoredResult> = HashMap::new();
    for list in lists {
        for result in list.iter() {
            by_key.insert(&result.key, result);
        }
    }

    ranking
        .keys()
        .iter()
        .filter_map(|key| by_key.get(key).map(|r| (*r).clone()))
        .take(limit)
        .collect()
}
