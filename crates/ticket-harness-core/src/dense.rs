//! Dense (embedding) scoring of a fragment snapshot.
//!
//! Every fragment with a usable stored vector is scored by cosine
//! similarity against the query vector. Fragments whose vector is missing,
//! fails to decode, has the wrong dimensionality, or has zero norm are
//! skipped; they stay eligible for lexical scoring.

use tracing::{debug, warn};

use crate::embedding::{cosine_similarity, l2_norm, VectorError};
use crate::models::{Fragment, ScoredResult};

/// Brute-force cosine scorer over a snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseScorer {
    /// Optional cap on the number of results returned.
    pub limit: Option<usize>,
}

impl DenseScorer {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit }
    }

    /// Score every eligible fragment, best first.
    ///
    /// Ties keep snapshot order.
    pub fn score(&self, query_vec: &[f32], fragments: &[Fragment]) -> Vec<ScoredResult> {
        let mut skipped = 0usize;
        let mut results: Vec<ScoredResult> = Vec::new();

        for fragment in fragments {
            let Some(stored) = fragment.vector.as_ref() else {
                continue;
            };
            match usable_vector(stored.decode(), query_vec.len()) {
                Ok(vector) => {
                    let sim = cosine_similarity(query_vec, &vector) as f64;
                    results.push(fragment.scored(sim));
                }
                Err(e) => {
                    skipped += 1;
                    debug!(fragment = %fragment.key(), error = %e, "skipping fragment vector");
                }
            }
        }

        if skipped > 0 {
            warn!(skipped, "fragments excluded from dense scoring");
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        if let Some(limit) = self.limit {
            results.truncate(limit);
        }
        results
    }
}

fn usable_vector(
    decoded: Result<Vec<f32>, VectorError>,
    expected_dims: usize,
) -> Result<Vec<f32>, VectorError> {
    let vector = decoded?;
    if vector.len() != expected_dims {
        return Err(VectorError::DimensionMismatch {
            expected: expected_dims,
            found: vector.len(),
        });
    }
    if l2_norm(&vector) == 0.0 {
        return Err(VectorError::ZeroNorm);
    }
    Ok(vector)
}
