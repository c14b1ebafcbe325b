//! Context assembly for answer generation.
//!
//! Picks at most `max_chunks` distinct fragments from the fused results,
//! ordering them by kind priority first and raw score second, and renders
//! them into a single text block:
//!
//! ```text
//! Ticket: INC-42
//! Section: resolution
//! Content:
//! Restarted the auth service.
//!
//! ---
//!
//! Ticket: INC-42
//! Section: summary
//! Content:
//! Login fails after update
//! ```

use std::collections::HashSet;

use serde::Serialize;

use crate::models::{FragmentKey, FragmentKind, ScoredResult};

/// Default number of fragments placed in a context block.
pub const DEFAULT_MAX_CHUNKS: usize = 3;

/// Separator between rendered entries.
pub const ENTRY_DELIMITER: &str = "\n\n---\n\n";

/// One selected fragment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub document_key: String,
    pub kind: FragmentKind,
    pub text: String,
}

impl ContextEntry {
    fn render(&self) -> String {
        format!(
            "Ticket: {}\nSection: {}\nContent:\n{}",
            self.document_key, self.kind, self.text
        )
        .trim()
        .to_string()
    }
}

/// Ordered, deduplicated fragments bounded by a maximum count.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextBlock {
    pub entries: Vec<ContextEntry>,
}

impl ContextBlock {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render entries joined by [`ENTRY_DELIMITER`]. Empty blocks render
    /// as an empty string.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(ContextEntry::render)
            .collect::<Vec<_>>()
            .join(ENTRY_DELIMITER)
    }
}

/// Select the context entries from `results`.
///
/// Sort key is `(kind priority ascending, score descending)`; priority
/// always dominates score. The first occurrence of each
/// `(document_key, kind)` wins. NaN scores sort after every number within
/// their tier.
pub fn select_context(results: &[ScoredResult], max_chunks: usize) -> ContextBlock {
    if max_chunks == 0 {
        return ContextBlock::default();
    }

    let mut ordered: Vec<&ScoredResult> = results.iter().collect();
    ordered.sort_by(|a, b| {
        a.kind()
            .priority()
            .cmp(&b.kind().priority())
            .then_with(|| score_desc(a.score, b.score))
    });

    let mut used: HashSet<&FragmentKey> = HashSet::new();
    let mut entries = Vec::with_capacity(max_chunks.min(ordered.len()));

    for result in ordered {
        if !used.insert(&result.key) {
            continue;
        }
        entries.push(ContextEntry {
            document_key: result.key.document_key.clone(),
            kind: result.key.kind.clone(),
            text: result.text.clone(),
        });
        if entries.len() >= max_chunks {
            break;
        }
    }

    ContextBlock { entries }
}

/// Select and render in one step.
pub fn build_context(results: &[ScoredResult], max_chunks: usize) -> String {
    select_context(results, max_chunks).render()
}

fn score_desc(a: f64, b: f64) -> std::cmp::Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}
