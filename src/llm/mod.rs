//! LLM completion client
//!
//! The pipeline only needs one capability: turn a prompt into a reply.
//! Remote calls go through a bounded connection pool; excess callers queue
//! on the semaphore and every request carries a timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{Result, TimelineError};

/// Capability interface for completion backends
#[async_trait]
pub trait Completer: Send + Sync {
    /// Produce a completion for the prompt
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Backend/model identifier
    fn model_name(&self) -> &str;
}

/// Settings for the HTTP completion client
#[derive(Debug, Clone)]
pub struct CompleterSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Per-request timeout (default 30s)
    pub timeout_ms: u64,
    /// Concurrent in-flight request bound
    pub pool_size: usize,
    /// Sampling cap forwarded to the endpoint
    pub max_tokens: u32,
}

impl Default for CompleterSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081/v1".to_string(),
            api_key: None,
            model: "default".to_string(),
            timeout_ms: 30_000,
            pool_size: 8,
            max_tokens: 1024,
        }
    }
}

/// HTTP completion client (OpenAI-compatible `/chat/completions` shape)
pub struct HttpCompleter {
    client: reqwest::Client,
    settings: CompleterSettings,
    pool: Arc<Semaphore>,
}

impl HttpCompleter {
    pub fn new(settings: CompleterSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .unwrap_or_default();
        let pool = Arc::new(Semaphore::new(settings.pool_size.max(1)));
        Self {
            client,
            settings,
            pool,
        }
    }
}

#[async_trait]
impl Completer for HttpCompleter {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| TimelineError::Internal("completion pool closed".to_string()))?;

        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let mut request = self.client.post(&url).json(&serde_json::json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        }));
        if let Some(ref key) = self.settings.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TimelineError::LlmUnavailable(format!("Transport error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TimelineError::LlmUnavailable(format!(
                "Completion endpoint error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TimelineError::LlmUnavailable(format!("Invalid response: {}", e)))?;

        let reply = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                TimelineError::LlmUnavailable("Invalid response format".to_string())
            })?;

        Ok(reply.to_string())
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}
