//! Engine configuration
//!
//! Plain structs with defaults matching the recognized configuration keys.
//! The server binary populates these from CLI flags / environment variables.

use serde::{Deserialize, Serialize};

/// Chunker configuration (`chunk.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum characters per fragment (default: 500)
    pub max_chars: usize,
    /// Characters shared between consecutive fragments (default: 50)
    pub overlap_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: 500,
            overlap_chars: 50,
        }
    }
}

/// Embedding client configuration (`embed.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Canonical vector dimension (default: 768)
    pub dimension: usize,
    /// Per-request timeout in milliseconds (default: 30000)
    pub timeout_ms: u64,
    /// Bounded retry attempts on transport failure (default: 3)
    pub max_retries: u32,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            dimension: 768,
            timeout_ms: 30_000,
            max_retries: 3,
        }
    }
}

/// Conversation window configuration (`window.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Rolling window size in messages (default: 6)
    pub size: usize,
    /// Upper bound on the running summary (default: 1000 chars)
    pub max_summary_chars: usize,
    /// Idle sessions older than this are swept (default: 24h)
    pub max_age_hours: u64,
    /// Sweep cadence (default: 60 min)
    pub cleanup_interval_minutes: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size: 6,
            max_summary_chars: 1000,
            max_age_hours: 24,
            cleanup_interval_minutes: 60,
        }
    }
}

/// Retrieval strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStrategy {
    /// Expand every hit by the configured neighborhood, as-is
    Fixed,
    /// Widen the neighborhood when mean hit quality is low
    #[default]
    Adaptive,
    /// Adaptive plus near-duplicate group suppression
    Intelligent,
}

impl std::str::FromStr for RetrievalStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(RetrievalStrategy::Fixed),
            "adaptive" => Ok(RetrievalStrategy::Adaptive),
            "intelligent" => Ok(RetrievalStrategy::Intelligent),
            _ => Err(format!("Unknown retrieval strategy: {}", s)),
        }
    }
}

/// Context retrieval configuration (`context.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub strategy: RetrievalStrategy,
    /// Neighborhood chunks before each hit (default: 2)
    pub chunks_before: usize,
    /// Neighborhood chunks after each hit (default: 2)
    pub chunks_after: usize,
    /// Top-K similar chunks to expand (default: 5)
    pub max_similar: usize,
    /// Hits below this score are discarded (default: 0.3)
    pub similarity_threshold: f32,
    /// Chunk cap per expanded group, centered on the hit (default: 5)
    pub max_per_group: usize,
    /// Group-count cap after merging (default: 3)
    pub max_groups: usize,
    /// Total chunk cap after merging (default: 20)
    pub max_total_chunks: usize,
    /// Adaptive: widen when mean hit score falls below this (default: 0.7)
    pub adaptive_quality_threshold: f32,
    /// Adaptive: neighborhood multiplier (default: 1.5)
    pub adaptive_expansion_factor: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::Adaptive,
            chunks_before: 2,
            chunks_after: 2,
            max_similar: 5,
            similarity_threshold: 0.3,
            max_per_group: 5,
            max_groups: 3,
            max_total_chunks: 20,
            adaptive_quality_threshold: 0.7,
            adaptive_expansion_factor: 1.5,
        }
    }
}

/// Vector index scoring configuration
///
/// The composite weights and the diversity threshold were tuned empirically
/// upstream; keep them overridable rather than hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Blend composite relevance (cosine + lexical) instead of pure cosine
    pub composite: bool,
    /// Cosine weight in the composite score (default: 0.7)
    pub cosine_weight: f32,
    /// Lexical-overlap weight in the composite score (default: 0.3)
    pub lexical_weight: f32,
    /// Enable the greedy diversity post-filter
    pub diversity: bool,
    /// Drop a candidate whose cosine to a kept one exceeds this (default: 0.9)
    pub diversity_threshold: f32,
    /// Max candidates kept by the diversity filter (default: 50)
    pub diversity_max_kept: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            composite: true,
            cosine_weight: 0.7,
            lexical_weight: 0.3,
            diversity: false,
            diversity_threshold: 0.9,
            diversity_max_kept: 50,
        }
    }
}

/// Prompt output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptFormat {
    /// Delimited role blocks for models that accept them
    #[default]
    Structured,
    /// Labeled-heading plain text
    Plain,
}

impl std::str::FromStr for PromptFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "structured" => Ok(PromptFormat::Structured),
            "plain" => Ok(PromptFormat::Plain),
            _ => Err(format!("Unknown prompt format: {}", s)),
        }
    }
}

/// Prompt builder configuration (`prompt.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Hard character budget for the assembled prompt (default: 4000)
    pub max_length: usize,
    pub format: PromptFormat,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_length: 4000,
            format: PromptFormat::Structured,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineConfig {
    pub chunk: ChunkConfig,
    pub embed: EmbedConfig,
    pub window: WindowConfig,
    pub context: RetrievalConfig,
    pub index: IndexConfig,
    pub prompt: PromptConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_recognized_keys() {
        let config = TimelineConfig::default();
        assert_eq!(config.chunk.max_chars, 500);
        assert_eq!(config.chunk.overlap_chars, 50);
        assert_eq!(config.embed.dimension, 768);
        assert_eq!(config.window.size, 6);
        assert_eq!(config.context.strategy, RetrievalStrategy::Adaptive);
        assert_eq!(config.context.max_total_chunks, 20);
        assert_eq!(config.prompt.max_length, 4000);
        assert_eq!(config.prompt.format, PromptFormat::Structured);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "intelligent".parse::<RetrievalStrategy>().unwrap(),
            RetrievalStrategy::Intelligent
        );
        assert!("hybrid".parse::<RetrievalStrategy>().is_err());
    }
}
