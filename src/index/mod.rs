//! Vector index: similarity and neighborhood queries
//!
//! Exact cosine scan over the session's embedded chunks. At the expected
//! scale (<= 1e5 chunks per session) a scan beats maintaining an
//! approximate index. Relevance is either pure cosine or a composite of
//! cosine and lexical overlap; ties break by recency, then chunk id.

use std::collections::HashSet;

use rusqlite::Connection;

use crate::config::IndexConfig;
use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::storage::chunks;
use crate::types::{ChunkEmbedding, ChunkHit};

pub use crate::storage::chunks::{
    count_by_session, delete_by_session, get_by_message, get_neighbors, put_batch, statistics,
};

/// Token-set Jaccard overlap between two texts, in [0, 1]
pub fn token_set_jaccard(a: &str, b: &str) -> f32 {
    let set_a = token_set(a);
    let set_b = token_set(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f32 / union as f32
}

fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Score one chunk against the query
fn relevance(
    chunk: &ChunkEmbedding,
    query_vector: &[f32],
    query_text: &str,
    config: &IndexConfig,
) -> Option<f32> {
    let vector = chunk.vector.as_ref()?;
    let cosine = cosine_similarity(query_vector, vector);
    if config.composite {
        let lexical = token_set_jaccard(query_text, &chunk.text);
        Some(config.cosine_weight * cosine + config.lexical_weight * lexical)
    } else {
        Some(cosine)
    }
}

/// Rank chunks by relevance; ties break by recency, then chunk id ascending
fn rank(
    chunks: Vec<ChunkEmbedding>,
    query_vector: &[f32],
    query_text: &str,
    config: &IndexConfig,
) -> Vec<(ChunkEmbedding, f32)> {
    let mut scored: Vec<(ChunkEmbedding, f32)> = chunks
        .into_iter()
        .filter_map(|c| relevance(&c, query_vector, query_text, config).map(|s| (c, s)))
        .collect();

    scored.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    scored
}

/// Greedy diversity filter: drop candidates too close to one already kept
fn diversify(scored: Vec<(ChunkEmbedding, f32)>, config: &IndexConfig) -> Vec<(ChunkEmbedding, f32)> {
    let mut kept: Vec<(ChunkEmbedding, f32)> = Vec::new();
    for (chunk, score) in scored {
        if kept.len() >= config.diversity_max_kept {
            break;
        }
        let near_duplicate = chunk.vector.as_ref().is_some_and(|v| {
            kept.iter().any(|(k, _)| {
                k.vector
                    .as_ref()
                    .is_some_and(|kv| cosine_similarity(v, kv) > config.diversity_threshold)
            })
        });
        if !near_duplicate {
            kept.push((chunk, score));
        }
    }
    kept
}

fn to_hits(scored: Vec<(ChunkEmbedding, f32)>) -> Vec<ChunkHit> {
    scored
        .into_iter()
        .map(|(c, score)| ChunkHit {
            chunk_id: c.chunk_id,
            message_id: c.message_id,
            session_id: c.session_id,
            chunk_index: c.chunk_index,
            text: c.text,
            score,
            timestamp: c.timestamp,
        })
        .collect()
}

/// Top-K chunks of a session by relevance, optionally excluding the chunks
/// of one message (used to keep the current turn out of its own context)
pub fn search_in_session(
    conn: &Connection,
    session_id: &str,
    query_vector: &[f32],
    query_text: &str,
    k: usize,
    exclude_message_id: Option<&str>,
    config: &IndexConfig,
) -> Result<Vec<ChunkHit>> {
    let mut candidates = chunks::list_embedded_by_session(conn, session_id)?;
    if let Some(excluded) = exclude_message_id {
        candidates.retain(|c| c.message_id != excluded);
    }

    let mut scored = rank(candidates, query_vector, query_text, config);
    scored.truncate(k);
    if config.diversity {
        scored = diversify(scored, config);
    }
    Ok(to_hits(scored))
}

/// Top-K chunks across all sessions
pub fn search_global(
    conn: &Connection,
    query_vector: &[f32],
    query_text: &str,
    k: usize,
    config: &IndexConfig,
) -> Result<Vec<ChunkHit>> {
    let candidates = chunks::list_embedded(conn)?;
    let mut scored = rank(candidates, query_vector, query_text, config);
    scored.truncate(k);
    if config.diversity {
        scored = diversify(scored, config);
    }
    Ok(to_hits(scored))
}

/// Every session chunk scoring at or above the threshold
pub fn search_with_threshold(
    conn: &Connection,
    session_id: &str,
    query_vector: &[f32],
    query_text: &str,
    threshold: f32,
    config: &IndexConfig,
) -> Result<Vec<ChunkHit>> {
    let candidates = chunks::list_embedded_by_session(conn, session_id)?;
    let mut scored = rank(candidates, query_vector, query_text, config);
    scored.retain(|(_, score)| *score >= threshold);
    Ok(to_hits(scored))
}
