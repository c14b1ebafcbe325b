//! Hybrid retrieval pipeline.
//!
//! All ranking runs over a single in-memory snapshot pulled from a
//! [`FragmentSource`]. The calling application provides the source, an
//! optional [`Embedder`] and [`SearchParams`]; nothing here touches a
//! database or configuration file.
//!
//! # Pipeline
//!
//! 1. Fetch the full fragment snapshot (fatal on failure).
//! 2. Embed the query once (fatal on failure unless
//!    [`EmbeddingFailurePolicy::LexicalOnly`] is set).
//! 3. Score the snapshot with BM25, keeping the top `lexical_top_k`.
//! 4. Score the snapshot by cosine similarity against stored vectors.
//! 5. Fuse both lists with Reciprocal Rank Fusion.
//! 6. Resolve the fused keys back to results and truncate to
//!    `final_limit`.
//!
//! Steps 3 and 4 share no state and run on `rayon::join` when the
//! `parallel` feature is enabled.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::context::{build_context, DEFAULT_MAX_CHUNKS};
use crate::dense::DenseScorer;
use crate::embedding::Embedder;
use crate::error::{Result, RetrievalError};
use crate::fusion::{fused_scores, resolve, DEFAULT_RRF_K};
use crate::lexical::{LexicalIndex, DEFAULT_LEXICAL_TOP_K};
use crate::models::{Fragment, FragmentKey, FusedRanking, ScoredResult};
use crate::source::FragmentSource;

/// Default number of fused results returned to the caller.
pub const DEFAULT_FINAL_LIMIT: usize = 10;

/// What to do when the query cannot be embedded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingFailurePolicy {
    /// Surface [`RetrievalError::Embedding`] to the caller.
    #[default]
    Fail,
    /// Log a warning and rank with BM25 alone.
    LexicalOnly,
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// BM25 results kept for fusion.
    pub lexical_top_k: usize,
    /// Cap on dense results kept for fusion. `None` keeps all.
    pub dense_limit: Option<usize>,
    /// RRF smoothing constant.
    pub rrf_k: f64,
    /// Maximum fused results returned.
    pub final_limit: usize,
    /// Maximum entries in an assembled context block.
    pub max_chunks: usize,
    pub on_embedding_failure: EmbeddingFailurePolicy,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            lexical_top_k: DEFAULT_LEXICAL_TOP_K,
            dense_limit: None,
            rrf_k: DEFAULT_RRF_K,
            final_limit: DEFAULT_FINAL_LIMIT,
            max_chunks: DEFAULT_MAX_CHUNKS,
            on_embedding_failure: EmbeddingFailurePolicy::Fail,
        }
    }
}

impl SearchParams {
    pub fn validate(&self) -> Result<()> {
        if !self.rrf_k.is_finite() || self.rrf_k < 0.0 {
            return Err(RetrievalError::InvalidParams(format!(
                "rrf_k must be a finite number >= 0, got {}",
                self.rrf_k
            )));
        }
        Ok(())
    }
}

/// Per-result scoring breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreExplanation {
    pub fragment_id: String,
    /// Summed RRF contributions.
    pub fused_score: f64,
    /// 0-based position in the lexical list, if present.
    pub lexical_rank: Option<usize>,
    pub lexical_score: Option<f64>,
    /// 0-based position in the dense list, if present.
    pub dense_rank: Option<usize>,
    pub dense_score: Option<f64>,
}

/// Everything produced by one ranking pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HybridResults {
    /// Fused results, best first, at most `final_limit`.
    pub results: Vec<ScoredResult>,
    /// BM25 list that went into fusion.
    pub lexical: Vec<ScoredResult>,
    /// Cosine list that went into fusion.
    pub dense: Vec<ScoredResult>,
    /// Full fused ordering with RRF scores, before truncation.
    #[serde(skip)]
    pub fused: Vec<(FragmentKey, f64)>,
    /// True when dense scoring was skipped (no embedder or a tolerated
    /// embedding failure).
    pub lexical_only: bool,
}

impl HybridResults {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Where each returned result came from, in result order.
    pub fn explain(&self) -> Vec<ScoreExplanation> {
        let lexical = positions(&self.lexical);
        let dense = positions(&self.dense);
        let fused: HashMap<&FragmentKey, f64> = self.fused.iter().map(|(k, s)| (k, *s)).collect();

        self.results
            .iter()
            .map(|r| {
                let lex = lexical.get(&r.key);
                let den = dense.get(&r.key);
                ScoreExplanation {
                    fragment_id: r.fragment_id.clone(),
                    fused_score: fused.get(&r.key).copied().unwrap_or(0.0),
                    lexical_rank: lex.map(|(rank, _)| *rank),
                    lexical_score: lex.map(|(_, score)| *score),
                    dense_rank: den.map(|(rank, _)| *rank),
                    dense_score: den.map(|(_, score)| *score),
                }
            })
            .collect()
    }
}

fn positions(list: &[ScoredResult]) -> HashMap<&FragmentKey, (usize, f64)> {
    let mut map = HashMap::with_capacity(list.len());
    for (rank, r) in list.iter().enumerate() {
        map.entry(&r.key).or_insert((rank, r.score));
    }
    map
}

/// Rank an already-materialized snapshot.
///
/// Pass `None` for `query_vec` to rank lexically only. Fragments with
/// blank text are ignored by both scorers.
pub fn rank_snapshot(
    snapshot: &[Fragment],
    query: &str,
    query_vec: Option<&[f32]>,
    params: &SearchParams,
) -> HybridResults {
    let fragments: Cow<'_, [Fragment]> = if snapshot.iter().any(|f| f.text.trim().is_empty()) {
        Cow::Owned(
            snapshot
                .iter()
                .filter(|f| !f.text.trim().is_empty())
                .cloned()
                .collect(),
        )
    } else {
        Cow::Borrowed(snapshot)
    };

    if fragments.is_empty() {
        return HybridResults {
            lexical_only: query_vec.is_none(),
            ..HybridResults::default()
        };
    }

    let scorer = DenseScorer::new(params.dense_limit);
    let lexical_pass = || {
        let started = Instant::now();
        let results = LexicalIndex::build(&fragments).search(query, params.lexical_top_k);
        debug!(
            results = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "lexical scoring done"
        );
        results
    };
    let dense_pass = || match query_vec {
        Some(qv) => {
            let started = Instant::now();
            let results = scorer.score(qv, &fragments);
            debug!(
                results = results.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "dense scoring done"
            );
            results
        }
        None => Vec::new(),
    };

    #[cfg(feature = "parallel")]
    let (lexical, dense) = rayon::join(lexical_pass, dense_pass);
    #[cfg(not(feature = "parallel"))]
    let (lexical, dense) = (lexical_pass(), dense_pass());

    let lists: [&[ScoredResult]; 2] = [&lexical, &dense];
    let fused = fused_scores(&lists, params.rrf_k);
    let ranking = FusedRanking(fused.iter().map(|(key, _)| key.clone()).collect());
    let results = resolve(&ranking, &lists, params.final_limit);

    HybridResults {
        results,
        lexical,
        dense,
        fused,
        lexical_only: query_vec.is_none(),
    }
}

/// Fetch a snapshot from `source`, embed the query and rank.
///
/// A blank query returns empty results without touching the source. An
/// empty snapshot returns empty results without calling the embedder.
#[instrument(skip_all, fields(query_len = query.len()))]
pub async fn hybrid_search<S>(
    source: &S,
    embedder: Option<&dyn Embedder>,
    query: &str,
    params: &SearchParams,
) -> Result<HybridResults>
where
    S: FragmentSource + ?Sized,
{
    params.validate()?;
    if query.trim().is_empty() {
        return Ok(HybridResults::default());
    }

    let snapshot = source
        .fetch_fragments()
        .await
        .map_err(RetrievalError::source_unavailable)?;

    if snapshot.is_empty() {
        debug!("fragment source is empty");
        return Ok(HybridResults {
            lexical_only: embedder.is_none(),
            ..HybridResults::default()
        });
    }

    let query_vec = match embedder {
        Some(embedder) => match embedder.embed(query).await {
            Ok(v) => Some(v),
            Err(e) => match params.on_embedding_failure {
                EmbeddingFailurePolicy::Fail => return Err(RetrievalError::embedding(e)),
                EmbeddingFailurePolicy::LexicalOnly => {
                    warn!(model = embedder.model_name(), error = %e, "query embedding failed, ranking lexically");
                    None
                }
            },
        },
        None => None,
    };

    let ranked = rank_snapshot(&snapshot, query, query_vec.as_deref(), params);
    info!(
        fragments = snapshot.len(),
        lexical = ranked.lexical.len(),
        dense = ranked.dense.len(),
        results = ranked.results.len(),
        lexical_only = ranked.lexical_only,
        "hybrid search complete"
    );
    Ok(ranked)
}

/// Run [`hybrid_search`] and assemble the context block from its results.
#[instrument(skip_all)]
pub async fn retrieve_context<S>(
    source: &S,
    embedder: Option<&dyn Embedder>,
    query: &str,
    params: &SearchParams,
) -> Result<(Vec<ScoredResult>, String)>
where
    S: FragmentSource + ?Sized,
{
    let ranked = hybrid_search(source, embedder, query, params).await?;
    let context = build_context(&ranked.results, params.max_chunks);
    Ok((ranked.results, context))
}
