//! Property tests locking the chunker and query-construction invariants.

use proptest::prelude::*;

use recall::chunker::{chunk_message, token_estimate, MIN_CHUNK_BUDGET};
use recall::config::RerankWeights;
use recall::storage::fts::{build_fts_query, normalize_bm25};
use recall::types::ChunkKind;

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

proptest! {
    /// Chunk indices are always a gap-free 0-based sequence.
    #[test]
    fn chunk_indices_contiguous(
        text in "[a-zA-Z0-9 .,\n]{0,2000}",
        budget in 80usize..400,
    ) {
        let drafts = chunk_message(&text, budget);
        for (expected, draft) in drafts.iter().enumerate() {
            prop_assert_eq!(draft.index, expected);
        }
    }

    /// Output is empty iff the trimmed content is empty.
    #[test]
    fn empty_iff_blank(text in "[a-zA-Z \n]{0,500}") {
        let drafts = chunk_message(&text, 320);
        prop_assert_eq!(drafts.is_empty(), text.trim().is_empty());
    }

    /// Prose chunks respect the token budget (no code in this alphabet,
    /// so the overlong-code-line exception cannot apply).
    #[test]
    fn prose_chunks_respect_budget(
        text in "[a-zA-Z0-9 .,\n]{0,3000}",
        budget in 80usize..400,
    ) {
        for draft in chunk_message(&text, budget) {
            prop_assert_eq!(draft.kind, ChunkKind::Prose);
            prop_assert!(
                draft.token_estimate <= budget.max(MIN_CHUNK_BUDGET),
                "chunk of {} tokens over budget {}",
                draft.token_estimate,
                budget
            );
        }
    }

    /// Concatenating prose chunks reproduces the original text up to
    /// whitespace normalization: no characters are lost or invented.
    #[test]
    fn prose_reassembles_modulo_whitespace(
        text in "[a-zA-Z0-9 .,\n]{0,2000}",
        budget in 80usize..400,
    ) {
        let drafts = chunk_message(&text, budget);
        let rejoined: String = drafts.iter().map(|d| d.content.as_str()).collect();
        prop_assert_eq!(strip_whitespace(&rejoined), strip_whitespace(&text));
    }

    /// The token estimate is positive for any non-blank text and bounded
    /// by the character count.
    #[test]
    fn token_estimate_bounds(text in "\\PC{0,400}") {
        let estimate = token_estimate(&text);
        if text.trim().is_empty() {
            prop_assert_eq!(estimate, 0);
        } else {
            prop_assert!(estimate >= 1);
            prop_assert!(estimate <= text.trim().chars().count());
        }
    }

    /// FTS query construction only emits quoted alphanumeric terms.
    #[test]
    fn fts_query_terms_are_safe(query in "\\PC{0,200}") {
        match build_fts_query(&query) {
            None => {}
            Some(expr) => {
                for term in expr.split(" OR ") {
                    prop_assert!(term.starts_with('"') && term.ends_with('"'));
                    let inner = &term[1..term.len() - 1];
                    prop_assert!(inner.chars().count() >= 2);
                    prop_assert!(inner.chars().all(|c| c.is_alphanumeric()));
                }
            }
        }
    }

    /// Normalized BM25 always lands in (0, 1].
    #[test]
    fn bm25_normalization_in_unit_interval(raw in -100.0f64..100.0) {
        let normalized = normalize_bm25(raw);
        prop_assert!(normalized > 0.0);
        prop_assert!(normalized <= 1.0);
    }

    /// Weight validation always lands within tolerance of 1.0.
    #[test]
    fn rerank_weights_validate_to_unit_sum(
        alpha in 0.0f32..2.0,
        beta in 0.0f32..2.0,
        gamma in 0.0f32..2.0,
    ) {
        let validated = RerankWeights { alpha, beta, gamma }.validated();
        let sum = validated.alpha + validated.beta + validated.gamma;
        prop_assert!((sum - 1.0).abs() <= 0.01, "sum {} out of tolerance", sum);
    }
}
