//! Property-based tests
//!
//! Invariants that must hold for all inputs:
//! - Chunking is bounded, deterministic, and never panics
//! - Cosine similarity stays in [-1, 1] with the identity at 1
//! - Embeddings keep the canonical dimension
//! - Built prompts respect the budget and carry the user turn verbatim
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// CHUNKER
// ============================================================================

mod chunker_props {
    use super::*;
    use timeline::chunking::{estimate_tokens, Chunker};
    use timeline::config::ChunkConfig;

    fn chunker(max_chars: usize, overlap_chars: usize) -> Chunker {
        Chunker::new(ChunkConfig {
            max_chars,
            overlap_chars,
        })
        .unwrap()
    }

    proptest! {
        /// Chunking never panics on any input
        #[test]
        fn never_panics(s in ".*") {
            let _ = chunker(50, 10).chunk(&s);
        }

        /// Every fragment respects the character bound and is non-empty
        #[test]
        fn fragments_bounded_and_nonempty(s in "\\PC{0,400}", max in 5usize..100) {
            let overlap = max / 5;
            for fragment in chunker(max, overlap).chunk(&s) {
                prop_assert!(fragment.chars().count() <= max);
                prop_assert!(!fragment.trim().is_empty());
            }
        }

        /// Same input, same fragments
        #[test]
        fn deterministic(s in "\\PC{0,400}") {
            let c = chunker(40, 8);
            prop_assert_eq!(c.chunk(&s), c.chunk(&s));
        }

        /// Whitespace-only input produces nothing
        #[test]
        fn whitespace_yields_empty(s in "\\s{0,100}") {
            prop_assert!(chunker(50, 10).chunk(&s).is_empty());
        }

        /// Token estimate is ceil(chars / 4)
        #[test]
        fn token_estimate(s in "\\PC{0,200}") {
            let chars = s.chars().count();
            prop_assert_eq!(estimate_tokens(&s), chars.div_ceil(4));
        }
    }
}

// ============================================================================
// COSINE SIMILARITY
// ============================================================================

mod cosine_props {
    use super::*;
    use timeline::embedding::cosine_similarity;

    proptest! {
        /// Similarity of any two equal-length vectors stays in [-1, 1]
        #[test]
        fn bounded(a in prop::collection::vec(-100.0f32..100.0, 8),
                   b in prop::collection::vec(-100.0f32..100.0, 8)) {
            let sim = cosine_similarity(&a, &b);
            prop_assert!((-1.001..=1.001).contains(&sim));
        }

        /// A non-zero vector is fully similar to itself
        #[test]
        fn identity(a in prop::collection::vec(0.1f32..100.0, 8)) {
            let sim = cosine_similarity(&a, &a);
            prop_assert!((sim - 1.0).abs() < 0.001);
        }
    }

    #[test]
    fn orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 0.001);
    }
}

// ============================================================================
// EMBEDDING DIMENSION UNIFORMITY
// ============================================================================

mod embedding_props {
    use super::*;
    use timeline::embedding::{Embedder, HashEmbedder};

    proptest! {
        /// Every embedding has exactly the canonical dimension
        #[test]
        fn dimension_uniform(s in "\\PC{0,200}", dim in 8usize..256) {
            let embedder = HashEmbedder::new(dim);
            let v = futures::executor::block_on(embedder.embed(&s)).unwrap();
            prop_assert_eq!(v.len(), dim);
        }

        /// Embedding is deterministic per input
        #[test]
        fn deterministic(s in "\\PC{0,200}") {
            let embedder = HashEmbedder::new(64);
            let a = futures::executor::block_on(embedder.embed(&s)).unwrap();
            let b = futures::executor::block_on(embedder.embed(&s)).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}

// ============================================================================
// LEXICAL OVERLAP
// ============================================================================

mod jaccard_props {
    use super::*;
    use timeline::index::token_set_jaccard;

    proptest! {
        /// Overlap score stays in [0, 1] and is symmetric
        #[test]
        fn bounded_and_symmetric(a in "\\PC{0,100}", b in "\\PC{0,100}") {
            let ab = token_set_jaccard(&a, &b);
            let ba = token_set_jaccard(&b, &a);
            prop_assert!((0.0..=1.0).contains(&ab));
            prop_assert_eq!(ab, ba);
        }
    }
}

// ============================================================================
// PROMPT BUDGET
// ============================================================================

mod prompt_props {
    use super::*;
    use timeline::config::{PromptConfig, PromptFormat};
    use timeline::error::TimelineError;
    use timeline::prompt::{PromptBuilder, SYSTEM_INSTRUCTION};

    proptest! {
        /// A built prompt never exceeds the budget and carries the user
        /// turn verbatim; oversized turns fail with PROMPT_OVERFLOW
        #[test]
        fn budget_holds(user in "\\PC{1,600}", summary in "\\PC{0,600}",
                        max in 150usize..800) {
            for format in [PromptFormat::Structured, PromptFormat::Plain] {
                let builder = PromptBuilder::new(PromptConfig { max_length: max, format });
                match builder.build(SYSTEM_INSTRUCTION, &summary, &[], &[], &user) {
                    Ok(built) => {
                        prop_assert!(built.text.chars().count() <= max);
                        prop_assert!(built.text.contains(&user));
                    }
                    Err(TimelineError::PromptOverflow { needed, max: limit }) => {
                        prop_assert!(needed > limit);
                    }
                    Err(e) => prop_assert!(false, "unexpected error: {}", e),
                }
            }
        }
    }
}

// ============================================================================
// SUMMARY TRUNCATION
// ============================================================================

mod summary_props {
    use super::*;
    use timeline::summary::truncate_at_sentence;

    proptest! {
        /// Truncation respects the bound and is a prefix of the input
        #[test]
        fn bounded_prefix(s in "\\PC{0,400}", max in 1usize..200) {
            let out = truncate_at_sentence(&s, max);
            prop_assert!(out.chars().count() <= max);
            prop_assert!(s.starts_with(&out));
        }
    }
}
