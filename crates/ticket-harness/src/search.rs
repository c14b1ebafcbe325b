//! `tkt search` and `tkt context`.
//!
//! Both commands run the hybrid pipeline from `ticket-harness-core` over
//! the SQLite fragment store. `search` prints the fused results;
//! `context` prints the assembled context block exactly as it would be
//! handed to the generator.

use anyhow::{Context, Result};

use ticket_harness_core::context::build_context;
use ticket_harness_core::embedding::Embedder;
use ticket_harness_core::search::{hybrid_search, HybridResults, SearchParams};
use ticket_harness_core::RetrievalError;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, ConfiguredEmbedder};
use crate::sqlite_store::SqliteFragmentStore;

const EXCERPT_CHARS: usize = 160;

/// The store and query embedder a search runs against.
pub struct Retriever {
    store: SqliteFragmentStore,
    embedder: Option<ConfiguredEmbedder>,
}

impl Retriever {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self::new(SqliteFragmentStore::new(pool), embedder))
    }

    pub fn new(store: SqliteFragmentStore, embedder: Option<ConfiguredEmbedder>) -> Self {
        Self { store, embedder }
    }

    pub async fn search(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<HybridResults, RetrievalError> {
        let embedder = self.embedder.as_ref().map(|e| e as &dyn Embedder);
        hybrid_search(&self.store, embedder, query, params).await
    }

    /// Fused results plus the rendered context block.
    pub async fn context(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<(HybridResults, String), RetrievalError> {
        let ranked = self.search(query, params).await?;
        let context = build_context(&ranked.results, params.max_chunks);
        Ok((ranked, context))
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }
}

/// Single-line excerpt of at most [`EXCERPT_CHARS`] characters.
pub fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    explain: bool,
) -> Result<()> {
    let mut params = config.retrieval.search_params();
    if let Some(limit) = limit {
        params.final_limit = limit;
    }

    let retriever = Retriever::open(config).await?;
    let ranked = retriever
        .search(query, &params)
        .await
        .context("Search failed")?;
    retriever.close().await;

    if ranked.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let explanations = if explain { ranked.explain() } else { Vec::new() };
    for (i, result) in ranked.results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({})",
            i + 1,
            result.score,
            result.fragment_id,
            result.kind()
        );
        println!("    ticket: {}", result.document_key());
        println!("    excerpt: \"{}\"", excerpt(&result.text));
        if let Some(e) = explanations.get(i) {
            println!(
                "    fused: {:.5}  lexical: {}  dense: {}",
                e.fused_score,
                rank_label(e.lexical_rank, e.lexical_score),
                rank_label(e.dense_rank, e.dense_score)
            );
        }
        println!();
    }

    if ranked.lexical_only && config.embedding.is_enabled() {
        println!("(dense ranking skipped: query embedding unavailable)");
    }
    Ok(())
}

fn rank_label(rank: Option<usize>, score: Option<f64>) -> String {
    match (rank, score) {
        (Some(rank), Some(score)) => format!("#{} ({:.4})", rank + 1, score),
        _ => "-".to_string(),
    }
}

pub async fn run_context(config: &Config, query: &str, max_chunks: Option<usize>) -> Result<()> {
    let mut params = config.retrieval.search_params();
    if let Some(max_chunks) = max_chunks {
        params.max_chunks = max_chunks;
    }

    let retriever = Retriever::open(config).await?;
    let (_, context) = retriever
        .context(query, &params)
        .await
        .context("Context retrieval failed")?;
    retriever.close().await;

    if context.is_empty() {
        println!("No context.");
    } else {
        println!("{}", context);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_flattens_whitespace() {
        assert_eq!(excerpt("Restart\n\nthe   service"), "Restart the service");
    }

    #[test]
    fn excerpt_is_bounded() {
        let long = "a".repeat(EXCERPT_CHARS + 20);
        let e = excerpt(&long);
        assert_eq!(e.len(), EXCERPT_CHARS + 3);
        assert!(e.ends_with("..."));
    }

    #[test]
    fn rank_labels_are_one_based() {
        assert_eq!(rank_label(Some(0), Some(1.5)), "#1 (1.5000)");
        assert_eq!(rank_label(None, None), "-");
    }
}
