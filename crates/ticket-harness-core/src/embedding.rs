//! Embedding trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that query-time embedding backends
//! implement, plus pure helpers for vector serialization and similarity.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the
//! `ticket-harness` app crate.

use async_trait::async_trait;
use thiserror::Error;

/// Embedding backend used to embed the query text.
///
/// Deployments use a fixed dimensionality across all calls; fragment
/// vectors are assumed to have been produced by the same model at
/// ingestion time.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a single text.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Why a stored vector could not be used for dense scoring.
#[derive(Debug, Error)]
pub enum VectorError {
    #[error("vector is not a JSON number array: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("vector is empty")]
    Empty,
    #[error("vector blob length {0} is not a multiple of 4")]
    BlobLength(usize),
    #[error("vector contains NaN or infinite components")]
    NonFinite,
    #[error("vector has {found} dimensions, query has {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("vector has zero norm")]
    ZeroNorm,
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use ticket_harness_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB back into a float vector.
///
/// Trailing bytes that do not form a whole `f32` are ignored; callers that
/// care check the length first.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Euclidean norm.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or exactly `0.0` when either vector
/// has zero norm, the vectors are empty, or their lengths differ.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (&x, &y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });

    let denom = aa.sqrt() * bb.sqrt();
    if !denom.is_finite() || denom == 0.0 {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}
