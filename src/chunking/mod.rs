//! Text chunking for embedding and retrieval
//!
//! Splits message text into bounded fragments with a character overlap so
//! consecutive fragments share context. Chunking is deterministic: the same
//! input and configuration always produce the same fragments, which is what
//! makes session reprocessing idempotent.

use crate::config::ChunkConfig;
use crate::error::{Result, TimelineError};

/// Deterministic overlapping-window chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// Create a chunker, validating the configuration
    pub fn new(config: ChunkConfig) -> Result<Self> {
        if config.max_chars == 0 {
            return Err(TimelineError::BadInput(
                "chunk.max_chars must be positive".to_string(),
            ));
        }
        if config.overlap_chars >= config.max_chars {
            return Err(TimelineError::BadInput(format!(
                "chunk.overlap_chars ({}) must be smaller than chunk.max_chars ({})",
                config.overlap_chars, config.max_chars
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Split text into ordered non-empty fragments.
    ///
    /// Each fragment is at most `max_chars` characters; each one after the
    /// first starts `overlap_chars` characters before the previous fragment's
    /// end. Whitespace at fragment boundaries is trimmed and fragments that
    /// trim to nothing are dropped.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.iter().all(|c| c.is_whitespace()) {
            return vec![];
        }

        let max = self.config.max_chars;
        let overlap = self.config.overlap_chars;

        let mut fragments = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + max).min(chars.len());
            let raw: String = chars[start..end].iter().collect();
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                fragments.push(trimmed.to_string());
            }
            if end == chars.len() {
                break;
            }
            start = end - overlap;
        }

        fragments
    }
}

/// Rough token estimate at ~4 characters per token, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    let len = text.chars().count();
    len.div_ceil(4)
}
