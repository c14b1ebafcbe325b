use std::collections::HashSet;

use proptest::prelude::*;
use ticket_harness_core::context::select_context;
use ticket_harness_core::dense::DenseScorer;
use ticket_harness_core::embedding::cosine_similarity;
use ticket_harness_core::fusion::{fused_scores, reciprocal_rank_fusion};
use ticket_harness_core::lexical::LexicalIndex;
use ticket_harness_core::models::{Fragment, FragmentKind, ScoredResult, StoredVector};

const KINDS: [&str; 7] = [
    "steps",
    "dependency_reason",
    "resolution",
    "root_cause",
    "description",
    "summary",
    "notes",
];

fn arb_result() -> impl Strategy<Value = ScoredResult> {
    (
        prop::sample::select(vec!["T1", "T2", "T3", "T4"]),
        prop::sample::select(KINDS.to_vec()),
        "[a-z ]{0,20}",
        -10.0f64..10.0,
    )
        .prop_map(|(doc, kind, text, score)| Fragment::new(doc, kind, text).scored(score))
}

fn arb_fragment() -> impl Strategy<Value = Fragment> {
    (
        "[A-Z]{1,2}-[0-9]{1,3}",
        prop::sample::select(KINDS.to_vec()),
        "[a-z]{1,6}( [a-z]{1,6}){0,8}",
        prop::option::of(prop::collection::vec(-1.0f32..1.0, 3)),
    )
        .prop_map(|(doc, kind, text, vector)| {
            let fragment = Fragment::new(doc, kind, text);
            match vector {
                Some(v) => fragment.with_vector(StoredVector::Values(v)),
                None => fragment,
            }
        })
}

fn ranked(keys: &[String]) -> Vec<ScoredResult> {
    keys.iter()
        .enumerate()
        .map(|(i, k)| Fragment::new(k.as_str(), FragmentKind::Summary, "x").scored(-(i as f64)))
        .collect()
}

proptest! {
    #[test]
    fn lexical_ranking_is_deterministic(
        frags in prop::collection::vec(arb_fragment(), 0..20),
        query in "[a-z]{1,6}( [a-z]{1,6}){0,3}",
    ) {
        let first = LexicalIndex::build(&frags).search(&query, 20);
        let second = LexicalIndex::build(&frags).search(&query, 20);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn dense_ranking_is_deterministic(
        frags in prop::collection::vec(arb_fragment(), 0..20),
        query in prop::collection::vec(-1.0f32..1.0, 3),
    ) {
        let scorer = DenseScorer::default();
        prop_assert_eq!(scorer.score(&query, &frags), scorer.score(&query, &frags));
    }

    #[test]
    fn fused_top_in_both_lists_leads(
        lexical_tail in prop::collection::hash_set("[a-z]{1,4}", 0..10),
        dense_tail in prop::collection::hash_set("[a-z]{1,4}", 0..10),
        k in 0u32..500,
    ) {
        let mut lexical_keys = vec!["TOP".to_string()];
        lexical_keys.extend(lexical_tail);
        let mut dense_keys = vec!["TOP".to_string()];
        dense_keys.extend(dense_tail);

        let lexical = ranked(&lexical_keys);
        let dense = ranked(&dense_keys);
        let fused = reciprocal_rank_fusion(&[&lexical, &dense], k as f64);
        prop_assert_eq!(fused.keys()[0].document_key.as_str(), "TOP");
    }

    #[test]
    fn fusion_is_deterministic(
        a in prop::collection::vec("[a-z]{1,3}", 0..15),
        b in prop::collection::vec("[a-z]{1,3}", 0..15),
    ) {
        let lexical = ranked(&a);
        let dense = ranked(&b);
        prop_assert_eq!(
            fused_scores(&[&lexical, &dense], 60.0),
            fused_scores(&[&lexical, &dense], 60.0)
        );
    }

    #[test]
    fn context_never_repeats_a_fragment(
        results in prop::collection::vec(arb_result(), 0..30),
        max_chunks in 0usize..10,
    ) {
        let block = select_context(&results, max_chunks);
        let mut seen = HashSet::new();
        for entry in &block.entries {
            prop_assert!(seen.insert((entry.document_key.clone(), entry.kind.clone())));
        }
    }

    #[test]
    fn context_is_bounded(
        results in prop::collection::vec(arb_result(), 0..30),
        max_chunks in 0usize..10,
    ) {
        let block = select_context(&results, max_chunks);
        prop_assert!(block.len() <= max_chunks);
        if max_chunks == 0 {
            prop_assert!(block.is_empty());
        }
    }

    #[test]
    fn context_priority_never_decreases(
        results in prop::collection::vec(arb_result(), 0..30),
        max_chunks in 1usize..10,
    ) {
        let block = select_context(&results, max_chunks);
        for pair in block.entries.windows(2) {
            prop_assert!(pair[0].kind.priority() <= pair[1].kind.priority());
        }
    }

    #[test]
    fn cosine_zero_vector_is_zero(v in prop::collection::vec(-100.0f32..100.0, 1..32)) {
        let zero = vec![0.0f32; v.len()];
        prop_assert_eq!(cosine_similarity(&zero, &v), 0.0);
        prop_assert_eq!(cosine_similarity(&v, &zero), 0.0);
    }

    #[test]
    fn cosine_self_similarity_is_one(
        v in prop::collection::vec(-100.0f32..100.0, 1..32)
            .prop_filter("non-zero", |v| v.iter().any(|x| x.abs() > 1e-3)),
    ) {
        let sim = cosine_similarity(&v, &v);
        prop_assert!((sim - 1.0).abs() < 1e-4, "self similarity was {}", sim);
    }

    #[test]
    fn garbage_vectors_never_abort_dense_scoring(
        raw in prop::collection::vec(".{0,24}", 0..10),
    ) {
        let frags: Vec<Fragment> = raw
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                Fragment::new(format!("T{i}"), FragmentKind::Summary, "text")
                    .with_vector(StoredVector::Serialized(s))
            })
            .collect();
        let results = DenseScorer::default().score(&[1.0, 0.0, 0.0], &frags);
        prop_assert!(results.len() <= frags.len());
        for r in &results {
            prop_assert!(r.score.is_finite());
        }
    }
}
