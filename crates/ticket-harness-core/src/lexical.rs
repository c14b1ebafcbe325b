//! BM25 lexical index over a fragment snapshot.
//!
//! The index is built from scratch for each query from the full snapshot;
//! nothing is persisted between calls.
//!
//! # Scoring
//!
//! Okapi BM25 with the usual defaults (`k1 = 1.5`, `b = 0.75`):
//!
//! ```text
//! idf(t)      = ln((N - n(t) + 0.5) / (n(t) + 0.5))
//! score(D, Q) = Σ_{t ∈ Q} idf(t) · f(t,D)·(k1+1) / (f(t,D) + k1·(1 - b + b·|D|/avgdl))
//! ```
//!
//! Terms that occur in more than half of the fragments get a negative raw
//! idf; those are floored to `epsilon × mean(idf)` so very common terms
//! still count a little instead of penalising a match.

use std::collections::{BTreeMap, HashMap};

use unicode_segmentation::UnicodeSegmentation;

use crate::models::{Fragment, ScoredResult};

/// Default number of lexical results kept for fusion.
pub const DEFAULT_LEXICAL_TOP_K: usize = 20;

/// Lower-case, word-boundary tokenization. No stemming, no stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .unicode_words()
        .map(str::to_string)
        .collect()
}

/// BM25 tuning constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization.
    pub b: f64,
    /// Fraction of the mean idf used as the floor for negative idf values.
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

/// In-memory term-frequency index for one snapshot.
pub struct LexicalIndex<'a> {
    fragments: &'a [Fragment],
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
    params: Bm25Params,
}

impl<'a> LexicalIndex<'a> {
    /// Index every fragment with default parameters.
    pub fn build(fragments: &'a [Fragment]) -> Self {
        Self::with_params(fragments, Bm25Params::default())
    }

    pub fn with_params(fragments: &'a [Fragment], params: Bm25Params) -> Self {
        let mut term_freqs = Vec::with_capacity(fragments.len());
        let mut doc_lens = Vec::with_capacity(fragments.len());
        // Ordered so the idf mean is summed in a fixed order.
        let mut doc_freq: BTreeMap<String, usize> = BTreeMap::new();

        for fragment in fragments {
            let tokens = tokenize(&fragment.text);
            doc_lens.push(tokens.len());

            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let n = fragments.len() as f64;
        let total_len: usize = doc_lens.iter().sum();
        let avgdl = if fragments.is_empty() {
            0.0
        } else {
            total_len as f64 / n
        };

        let mut idf: HashMap<String, f64> = HashMap::with_capacity(doc_freq.len());
        let mut idf_sum = 0.0;
        let mut negative: Vec<&str> = Vec::new();
        for (term, &df) in &doc_freq {
            let df = df as f64;
            let value = ((n - df + 0.5) / (df + 0.5)).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term);
            }
            idf.insert(term.clone(), value);
        }

        if !doc_freq.is_empty() {
            let floor = params.epsilon * (idf_sum / doc_freq.len() as f64);
            for term in negative {
                idf.insert(term.to_string(), floor);
            }
        }

        Self {
            fragments,
            term_freqs,
            doc_lens,
            avgdl,
            idf,
            params,
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// BM25 score of every fragment, in snapshot order.
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let query_terms = tokenize(query);
        let Bm25Params { k1, b, .. } = self.params;

        self.term_freqs
            .iter()
            .zip(self.doc_lens.iter())
            .map(|(tf, &len)| {
                let length_ratio = if self.avgdl > 0.0 {
                    len as f64 / self.avgdl
                } else {
                    0.0
                };
                let norm = k1 * (1.0 - b + b * length_ratio);

                query_terms
                    .iter()
                    .map(|term| {
                        let freq = tf.get(term).copied().unwrap_or(0) as f64;
                        if freq == 0.0 {
                            return 0.0;
                        }
                        let idf = self.idf.get(term).copied().unwrap_or(0.0);
                        idf * (freq * (k1 + 1.0)) / (freq + norm)
                    })
                    .fold(0.0, |acc, s| acc + s)
            })
            .collect()
    }

    /// Top-`k` fragments by descending BM25 score.
    ///
    /// Ties keep snapshot order. An empty or whitespace-only query scores
    /// every fragment `0.0`, so the first `k` fragments come back in
    /// snapshot order.
    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredResult> {
        let scores = self.scores(query);

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(idx, score)| self.fragments[idx].scored(score))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FragmentKind;

    fn fixture() -> Vec<Fragment> {
        vec![
            Fragment::new("T1", FragmentKind::Summary, "login fails"),
            Fragment::new("T1", FragmentKind::Resolution, "restart service"),
            Fragment::new("T2", FragmentKind::Summary, "login fails after update"),
        ]
    }

    #[test]
    fn tokenize_lowercases_and_splits_on_word_boundaries() {
        assert_eq!(
            tokenize("Login FAILS, after the update!"),
            vec!["login", "fails", "after", "the", "update"]
        );
        assert!(tokenize("   \t ").is_empty());
    }

    #[test]
    fn matching_fragments_rank_above_non_matching() {
        let frags = fixture();
        let index = LexicalIndex::build(&frags);
        let results = index.search("login fails", 20);

        let ids: Vec<String> = results.iter().map(|r| r.fragment_id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2], "T1-resolution");
        assert!(results[0].score > results[2].score);
        assert!(results[1].score > results[2].score);
    }

    #[test]
    fn shorter_fragment_wins_on_equal_term_matches() {
        let frags = fixture();
        let index = LexicalIndex::build(&frags);
        let results = index.search("login fails", 20);
        assert_eq!(results[0].fragment_id, "T1-summary");
    }

    #[test]
    fn common_terms_keep_a_positive_floor() {
        let frags = vec![
            Fragment::new("A", FragmentKind::Summary, "printer jam"),
            Fragment::new("B", FragmentKind::Summary, "printer offline"),
            Fragment::new("C", FragmentKind::Summary, "printer toner"),
            Fragment::new("D", FragmentKind::Summary, "network down"),
        ];
        let index = LexicalIndex::build(&frags);
        let scores = index.scores("printer");
        assert!(scores[0] > 0.0, "floored idf should stay positive");
        assert_eq!(scores[3], 0.0);
    }

    #[test]
    fn empty_snapshot_returns_nothing() {
        let frags: Vec<Fragment> = Vec::new();
        let index = LexicalIndex::build(&frags);
        assert!(index.is_empty());
        assert!(index.search("anything", 20).is_empty());
    }

    #[test]
    fn blank_query_scores_zero_in_snapshot_order() {
        let frags = fixture();
        let index = LexicalIndex::build(&frags);
        let results = index.search("   ", 2);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.score == 0.0));
        assert_eq!(results[0].fragment_id, "T1-summary");
        assert_eq!(results[1].fragment_id, "T1-resolution");
    }

    #[test]
    fn top_k_truncates() {
        let frags = fixture();
        let index = LexicalIndex::build(&frags);
        assert_eq!(index.search("login", 1).len(), 1);
    }

    #[test]
    fn punctuation_only_corpus_does_not_divide_by_zero() {
        let frags = vec![Fragment::new("X", FragmentKind::Summary, "--- !!!")];
        let index = LexicalIndex::build(&frags);
        let scores = index.scores("login");
        assert_eq!(scores, vec![0.0]);
    }
}
