//! Context retrieval with neighborhood expansion
//!
//! A user turn is embedded and matched against the session's chunks; each
//! hit is expanded to its surrounding chunk neighborhood within the owning
//! message. Three strategies share one configuration: FIXED returns the
//! expanded groups as-is, ADAPTIVE widens the neighborhood when mean hit
//! quality is low, INTELLIGENT additionally suppresses near-duplicate
//! groups by lexical overlap.

pub mod merge;

use rusqlite::Connection;

use crate::config::{IndexConfig, RetrievalConfig, RetrievalStrategy};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::index;
use crate::storage::{chunks, Storage};
use crate::types::{ChunkHit, ExpandedGroup};

/// Upper bound on the widened neighborhood radius under ADAPTIVE
const MAX_NEIGHBORHOOD: usize = 8;

/// Retrieve expanded context groups for a user turn.
///
/// Empty session and no-hit cases return an empty list; embedding failure
/// propagates as `EMBEDDING_UNAVAILABLE` for the caller's policy to handle.
pub async fn retrieve(
    storage: &Storage,
    embedder: &dyn Embedder,
    query: &str,
    session_id: &str,
    current_message_id: Option<&str>,
    config: &RetrievalConfig,
    index_config: &IndexConfig,
) -> Result<Vec<ExpandedGroup>> {
    let query_vector = embedder.embed(query).await?;

    let query = query.to_string();
    let session_id = session_id.to_string();
    let current_message_id = current_message_id.map(String::from);
    let config = config.clone();
    let index_config = index_config.clone();

    storage.with_connection(move |conn| {
        let mut hits = index::search_in_session(
            conn,
            &session_id,
            &query_vector,
            &query,
            config.max_similar,
            current_message_id.as_deref(),
            &index_config,
        )?;
        hits.retain(|h| h.score >= config.similarity_threshold);
        if hits.is_empty() {
            return Ok(vec![]);
        }

        let mut before = config.chunks_before;
        let mut after = config.chunks_after;
        let mut groups = expand(conn, &hits, before, after)?;

        if matches!(
            config.strategy,
            RetrievalStrategy::Adaptive | RetrievalStrategy::Intelligent
        ) {
            let mean = hits.iter().map(|h| h.score).sum::<f32>() / hits.len() as f32;
            if mean < config.adaptive_quality_threshold {
                before = widen(before, config.adaptive_expansion_factor);
                after = widen(after, config.adaptive_expansion_factor);
                groups = expand(conn, &hits, before, after)?;
            }
        }

        if config.strategy == RetrievalStrategy::Intelligent {
            groups = drop_duplicate_groups(groups, index_config.diversity_threshold);
        }

        for group in &mut groups {
            cap_group(group, config.max_per_group);
        }

        Ok(groups)
    })
}

fn widen(radius: usize, factor: f32) -> usize {
    (((radius as f32) * factor).ceil() as usize).min(MAX_NEIGHBORHOOD)
}

/// Expand each hit to its chunk neighborhood within the owning message
fn expand(
    conn: &Connection,
    hits: &[ChunkHit],
    before: usize,
    after: usize,
) -> Result<Vec<ExpandedGroup>> {
    let mut groups = Vec::with_capacity(hits.len());
    for hit in hits {
        let neighbors = chunks::get_neighbors(conn, &hit.message_id, hit.chunk_index, before, after)?;
        if neighbors.is_empty() {
            continue;
        }
        groups.push(ExpandedGroup {
            message_id: hit.message_id.clone(),
            chunks: neighbors,
            hit_score: hit.score,
            hit_index: hit.chunk_index,
        });
    }
    Ok(groups)
}

/// Drop groups whose combined text near-duplicates an already-kept group
fn drop_duplicate_groups(groups: Vec<ExpandedGroup>, overlap_threshold: f32) -> Vec<ExpandedGroup> {
    let mut kept: Vec<ExpandedGroup> = Vec::with_capacity(groups.len());
    let mut kept_texts: Vec<String> = Vec::new();

    for group in groups {
        let text = combined_text(&group);
        let duplicate = kept_texts
            .iter()
            .any(|seen| index::token_set_jaccard(&text, seen) >= overlap_threshold);
        if !duplicate {
            kept_texts.push(text);
            kept.push(group);
        }
    }
    kept
}

fn combined_text(group: &ExpandedGroup) -> String {
    let parts: Vec<&str> = group.chunks.iter().map(|c| c.text.as_str()).collect();
    parts.join(" ")
}

/// Trim a group to `max_per_group` chunks, keeping those nearest the hit
fn cap_group(group: &mut ExpandedGroup, max_per_group: usize) {
    while group.chunks.len() > max_per_group.max(1) {
        let first = group.chunks.first().map(|c| c.chunk_index).unwrap_or(0);
        let last = group.chunks.last().map(|c| c.chunk_index).unwrap_or(0);
        let first_distance = group.hit_index.abs_diff(first);
        let last_distance = group.hit_index.abs_diff(last);
        if last_distance >= first_distance {
            group.chunks.pop();
        } else {
            group.chunks.remove(0);
        }
    }
}
