//! Core types for the timeline engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a chunk row
pub type ChunkId = i64;

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// One chat turn, chained to its predecessor via `parent_message_id`.
///
/// Immutable once persisted, except chain repair which may rewrite the
/// parent link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Opaque unique identifier
    pub id: String,
    /// Session the message belongs to
    pub session_id: String,
    /// Speaker role
    pub role: Role,
    /// Message text
    pub content: String,
    /// Creation time; strictly increasing within a session's chain
    pub timestamp: DateTime<Utc>,
    /// Previous message in the same session, None for the session root
    pub parent_message_id: Option<String>,
}

impl Message {
    /// Construct a new message with a fresh id
    pub fn new(
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        parent_message_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            timestamp,
            parent_message_id,
        }
    }
}

/// An indexed fragment of a message with its embedding.
///
/// `vector` is None while the chunk is pending embedding; such chunks are
/// invisible to similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEmbedding {
    /// Auto-assigned row id
    pub chunk_id: ChunkId,
    /// Owning message
    pub message_id: String,
    /// Session of the owning message
    pub session_id: String,
    /// 0-based ordinal inside the message
    pub chunk_index: usize,
    /// Fragment text
    pub text: String,
    /// Embedding vector of canonical dimension, None = pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// Timestamp of the owning message (recency tie-break)
    pub timestamp: DateTime<Utc>,
}

/// Input for inserting a chunk row
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub message_id: String,
    pub session_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub vector: Option<Vec<f32>>,
    pub timestamp: DateTime<Utc>,
}

/// A similarity-search hit
#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub chunk_id: ChunkId,
    pub message_id: String,
    pub session_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
    pub timestamp: DateTime<Utc>,
}

/// The neighborhood of chunks around a similarity hit, all from one message
#[derive(Debug, Clone, Serialize)]
pub struct ExpandedGroup {
    /// Owning message of every chunk in the group
    pub message_id: String,
    /// Chunks in ascending `chunk_index` order
    pub chunks: Vec<ChunkEmbedding>,
    /// Score of the originating hit
    pub hit_score: f32,
    /// Ordinal of the originating hit inside the message
    pub hit_index: usize,
}

/// A merger of overlapping expanded groups within one message
#[derive(Debug, Clone, Serialize)]
pub struct ContextGroup {
    pub message_id: String,
    /// Sorted union of the merged groups' chunks
    pub chunks: Vec<ChunkEmbedding>,
    /// Best originating hit score among the merged groups
    pub score: f32,
    pub earliest_timestamp: DateTime<Utc>,
    pub latest_timestamp: DateTime<Utc>,
}

impl ContextGroup {
    /// Concatenated chunk text in ordinal order
    pub fn combined_text(&self) -> String {
        let parts: Vec<&str> = self.chunks.iter().map(|c| c.text.as_str()).collect();
        parts.join(" ")
    }
}

/// Window state returned by `ConversationWindow::context`
#[derive(Debug, Clone, Default, Serialize)]
pub struct WindowContext {
    /// Most recent messages, oldest first
    pub recent_messages: Vec<Message>,
    /// Running summary of aged-out content, empty if none
    pub summary: String,
    /// When the summary last absorbed evicted messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_summarized_at: Option<DateTime<Utc>>,
}

/// Per-session and per-message chunk counts
#[derive(Debug, Clone, Serialize)]
pub struct VectorStatistics {
    pub total_chunks: i64,
    pub embedded_chunks: i64,
    pub pending_chunks: i64,
    pub sessions: Vec<SessionChunkCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionChunkCount {
    pub session_id: String,
    pub chunk_count: i64,
    pub message_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("ASSISTANT".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!(Role::User.to_string(), "user");
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn test_combined_text_orders_by_chunk() {
        let ts = Utc::now();
        let group = ContextGroup {
            message_id: "m1".to_string(),
            chunks: vec![
                ChunkEmbedding {
                    chunk_id: 1,
                    message_id: "m1".to_string(),
                    session_id: "s1".to_string(),
                    chunk_index: 0,
                    text: "alpha".to_string(),
                    vector: None,
                    timestamp: ts,
                },
                ChunkEmbedding {
                    chunk_id: 2,
                    message_id: "m1".to_string(),
                    session_id: "s1".to_string(),
                    chunk_index: 1,
                    text: "beta".to_string(),
                    vector: None,
                    timestamp: ts,
                },
            ],
            score: 0.9,
            earliest_timestamp: ts,
            latest_timestamp: ts,
        };
        assert_eq!(group.combined_text(), "alpha beta");
    }
}
