//! Feature-hashing embedding fallback
//!
//! Deterministic, fast, no network. Used by tests and by deployments that
//! run without an embedding service. Tokens and token bigrams are hashed
//! into signed buckets with a log term-frequency weight, then L2 normalized.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use super::Embedder;
use crate::error::Result;

/// Local embedder using the hashing trick
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    fn bucket(feature: &str, dimensions: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        feature.hash(&mut hasher);
        (hasher.finish() as usize) % dimensions
    }

    /// Signed buckets reduce the impact of hash collisions
    fn sign(feature: &str) -> f32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        feature.hash(&mut hasher);
        if hasher.finish().rotate_left(17) % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }

    fn accumulate(&self, embedding: &mut [f32], feature: &str, weight: f32) {
        let idx = Self::bucket(feature, self.dimensions);
        embedding[idx] += weight * Self::sign(feature);
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];

        if tokens.is_empty() {
            // Non-empty input with no alphanumeric content still needs a
            // usable vector; fall back to hashing the raw text once.
            self.accumulate(&mut embedding, text, 1.0);
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len().max(1) as f32;
        for (token, count) in &tf {
            let weight = (1.0 + count / doc_len).ln() + 0.1 * token.len() as f32;
            self.accumulate(&mut embedding, token, weight);
        }

        // Bigrams capture local word order, weighted below unigrams
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut embedding, &bigram, 0.5);
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "local-hash"
    }
}
