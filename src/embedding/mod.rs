//! Embedding generation
//!
//! Supports two backends:
//! - Remote HTTP embedding endpoint (OpenAI-compatible wire shape)
//! - Local feature-hashing fallback (no external dependencies)

mod http;
mod local;

pub use http::HttpEmbedder;
pub use local::HashEmbedder;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EmbedConfig;
use crate::error::{Result, TimelineError};

/// Capability interface for embedding generators.
///
/// Implementations return vectors of exactly `dimensions()` components,
/// finite and non-zero for non-empty input.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Canonical embedding dimension
    fn dimensions(&self) -> usize;

    /// Backend/model identifier
    fn model_name(&self) -> &str;
}

/// Settings for constructing the configured embedder backend
#[derive(Debug, Clone)]
pub struct EmbedderSettings {
    /// "http" or "local"
    pub backend: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub config: EmbedConfig,
}

/// Create an embedder from settings
pub fn create_embedder(settings: &EmbedderSettings) -> Result<Arc<dyn Embedder>> {
    match settings.backend.as_str() {
        "http" => Ok(Arc::new(HttpEmbedder::new(
            settings.base_url.clone(),
            settings.api_key.clone(),
            settings.model.clone(),
            settings.config.clone(),
        ))),
        "local" => Ok(Arc::new(HashEmbedder::new(settings.config.dimension))),
        other => Err(TimelineError::Config(format!(
            "Unknown embedding backend: {}",
            other
        ))),
    }
}

/// Validate a vector against the canonical dimension.
///
/// Rejects wrong-dimension, non-finite, and all-zero vectors.
pub fn validate_vector(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(TimelineError::EmbeddingUnavailable(format!(
            "Embedding has {} components, expected {}",
            vector.len(),
            dimension
        )));
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(TimelineError::EmbeddingUnavailable(
            "Embedding contains non-finite components".to_string(),
        ));
    }
    if vector.iter().all(|x| *x == 0.0) {
        return Err(TimelineError::EmbeddingUnavailable(
            "Embedding is the zero vector".to_string(),
        ));
    }
    Ok(())
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_validate_vector() {
        assert!(validate_vector(&[0.5, 0.5], 2).is_ok());
        assert!(validate_vector(&[0.5], 2).is_err());
        assert!(validate_vector(&[f32::NAN, 0.5], 2).is_err());
        assert!(validate_vector(&[0.0, 0.0], 2).is_err());
    }

    #[tokio::test]
    async fn test_hash_embedder_dimension() {
        let embedder = HashEmbedder::new(128);
        let v = embedder.embed("Hello world").await.unwrap();
        assert_eq!(v.len(), 128);
    }
}
