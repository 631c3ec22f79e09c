//! Remote embedding endpoint client
//!
//! Speaks the OpenAI-compatible `/embeddings` wire shape. Transport failures
//! and 5xx responses are retried with exponential backoff up to the
//! configured attempt bound; the caller sees `EMBEDDING_UNAVAILABLE` once
//! retries are exhausted. 4xx responses indicate misconfiguration and are
//! not retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{validate_vector, Embedder};
use crate::config::EmbedConfig;
use crate::error::{Result, TimelineError};

/// Base delay for the exponential backoff schedule
const BACKOFF_BASE_MS: u64 = 200;

/// Concurrent in-flight request bound; excess callers queue
const POOL_SIZE: usize = 8;

/// HTTP embedding client
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    config: EmbedConfig,
    pool: Arc<Semaphore>,
}

impl HttpEmbedder {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        config: EmbedConfig,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            api_key,
            model,
            config,
            pool: Arc::new(Semaphore::new(POOL_SIZE)),
        }
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&serde_json::json!({
            "input": text,
            "model": self.model,
        }));
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(TimelineError::Config(format!(
                    "Embedding endpoint rejected request ({}): {}",
                    status, body
                )));
            }
            return Err(TimelineError::EmbeddingUnavailable(format!(
                "Embedding endpoint error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let embedding: Vec<f32> = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| {
                TimelineError::EmbeddingUnavailable("Invalid response format".to_string())
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        validate_vector(&embedding, self.config.dimension)?;
        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| TimelineError::Internal("embedding pool closed".to_string()))?;

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = BACKOFF_BASE_MS * (1 << (attempt - 1).min(6));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.request_embedding(text).await {
                Ok(vector) => return Ok(vector),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, error = %e, "embedding request failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(TimelineError::EmbeddingUnavailable(format!(
            "Exhausted {} retries: {}",
            self.config.max_retries,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        )))
    }

    fn dimensions(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
