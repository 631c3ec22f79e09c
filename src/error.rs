//! Error types for the timeline engine

use thiserror::Error;

/// Result type alias for timeline operations
pub type Result<T> = std::result::Result<T, TimelineError>;

/// Main error type for the timeline engine
#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate message id: {0}")]
    Duplicate(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Prompt overflow: user turn needs {needed} chars, budget is {max}")]
    PromptOverflow { needed: usize, max: usize },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TimelineError {
    /// Stable machine-readable error kind, surfaced to API clients
    pub fn kind(&self) -> &'static str {
        match self {
            TimelineError::BadInput(_) => "BAD_INPUT",
            TimelineError::NotFound(_) => "NOT_FOUND",
            TimelineError::Duplicate(_) => "DUPLICATE",
            TimelineError::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
            TimelineError::LlmUnavailable(_) => "LLM_UNAVAILABLE",
            TimelineError::StoreUnavailable(_) | TimelineError::Database(_) => "STORE_UNAVAILABLE",
            TimelineError::PromptOverflow { .. } => "PROMPT_OVERFLOW",
            _ => "INTERNAL",
        }
    }

    /// Check if error is retryable by a background worker
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TimelineError::EmbeddingUnavailable(_)
                | TimelineError::LlmUnavailable(_)
                | TimelineError::StoreUnavailable(_)
                | TimelineError::Http(_)
        )
    }
}
