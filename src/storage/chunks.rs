//! Chunk embedding row queries
//!
//! Vectors are stored as little-endian f32 blobs next to their dimension
//! count; a NULL blob marks a pending-embedding chunk. `(message_id,
//! chunk_index)` is unique, which is what makes reindexing idempotent.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::messages::format_timestamp;
use crate::error::{Result, TimelineError};
use crate::types::{ChunkEmbedding, NewChunk, SessionChunkCount, VectorStatistics};

/// Serialize a vector to a little-endian byte blob
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a vector blob, checking the byte length against dimensions
pub fn blob_to_vector(bytes: &[u8], dimensions: usize) -> Result<Vec<f32>> {
    let expected = dimensions
        .checked_mul(4)
        .ok_or_else(|| TimelineError::BadInput("Embedding dimensions too large".to_string()))?;
    if bytes.len() != expected {
        return Err(TimelineError::BadInput(format!(
            "Embedding byte length {} does not match dimensions {}",
            bytes.len(),
            dimensions
        )));
    }

    let mut vector = Vec::with_capacity(dimensions);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk.try_into().expect("chunks_exact yields 4 bytes");
        vector.push(f32::from_le_bytes(arr));
    }
    Ok(vector)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a chunk from a database row
pub fn chunk_from_row(row: &Row) -> rusqlite::Result<ChunkEmbedding> {
    let bytes: Option<Vec<u8>> = row.get("embedding")?;
    let dimensions: Option<i64> = row.get("dimensions")?;
    let chunk_index: i64 = row.get("chunk_index")?;
    let timestamp: String = row.get("timestamp")?;

    let vector = match (bytes, dimensions) {
        (Some(bytes), Some(dims)) => blob_to_vector(&bytes, dims as usize).ok(),
        _ => None,
    };

    Ok(ChunkEmbedding {
        chunk_id: row.get("chunk_id")?,
        message_id: row.get("message_id")?,
        session_id: row.get("session_id")?,
        chunk_index: chunk_index as usize,
        text: row.get("text")?,
        vector,
        timestamp: parse_timestamp(&timestamp),
    })
}

const CHUNK_COLUMNS: &str =
    "chunk_id, message_id, session_id, chunk_index, text, embedding, dimensions, timestamp";

/// Append-only batch insert
pub fn put_batch(conn: &Connection, chunks: &[NewChunk]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO chunk_embeddings
             (message_id, session_id, chunk_index, text, embedding, dimensions, timestamp, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )?;

    let now = format_timestamp(&Utc::now());
    let mut inserted = 0;
    for chunk in chunks {
        let blob = chunk.vector.as_ref().map(|v| vector_to_blob(v));
        let dims = chunk.vector.as_ref().map(|v| v.len() as i64);
        inserted += stmt.execute(params![
            chunk.message_id,
            chunk.session_id,
            chunk.chunk_index as i64,
            chunk.text,
            blob,
            dims,
            format_timestamp(&chunk.timestamp),
            now,
        ])?;
    }
    Ok(inserted)
}

/// All chunks of a message in ascending ordinal order
pub fn get_by_message(conn: &Connection, message_id: &str) -> Result<Vec<ChunkEmbedding>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM chunk_embeddings WHERE message_id = ? ORDER BY chunk_index ASC",
        CHUNK_COLUMNS
    ))?;
    let chunks = stmt
        .query_map(params![message_id], chunk_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(chunks)
}

/// The ordinal window `[chunk_index - before, chunk_index + after]` of a
/// message's chunks, clamped to existing ordinals, ascending order
pub fn get_neighbors(
    conn: &Connection,
    message_id: &str,
    chunk_index: usize,
    before: usize,
    after: usize,
) -> Result<Vec<ChunkEmbedding>> {
    let low = chunk_index.saturating_sub(before) as i64;
    let high = (chunk_index + after) as i64;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM chunk_embeddings
         WHERE message_id = ? AND chunk_index BETWEEN ? AND ?
         ORDER BY chunk_index ASC",
        CHUNK_COLUMNS
    ))?;
    let chunks = stmt
        .query_map(params![message_id, low, high], chunk_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(chunks)
}

/// All embedded chunks of a session (pending chunks are skipped)
pub fn list_embedded_by_session(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<ChunkEmbedding>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM chunk_embeddings
         WHERE session_id = ? AND embedding IS NOT NULL
         ORDER BY chunk_id ASC",
        CHUNK_COLUMNS
    ))?;
    let chunks = stmt
        .query_map(params![session_id], chunk_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(chunks)
}

/// All embedded chunks across sessions
pub fn list_embedded(conn: &Connection) -> Result<Vec<ChunkEmbedding>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM chunk_embeddings WHERE embedding IS NOT NULL ORDER BY chunk_id ASC",
        CHUNK_COLUMNS
    ))?;
    let chunks = stmt
        .query_map([], chunk_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(chunks)
}

/// All chunks of a session, ordinal order within each message
pub fn list_by_session(conn: &Connection, session_id: &str) -> Result<Vec<ChunkEmbedding>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM chunk_embeddings WHERE session_id = ?
         ORDER BY message_id ASC, chunk_index ASC",
        CHUNK_COLUMNS
    ))?;
    let chunks = stmt
        .query_map(params![session_id], chunk_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(chunks)
}

/// Delete all chunks of a message; returns the number removed
pub fn delete_by_message(conn: &Connection, message_id: &str) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM chunk_embeddings WHERE message_id = ?",
        params![message_id],
    )?;
    Ok(deleted)
}

/// Delete all chunks of a session; returns the number removed
pub fn delete_by_session(conn: &Connection, session_id: &str) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM chunk_embeddings WHERE session_id = ?",
        params![session_id],
    )?;
    Ok(deleted)
}

/// Chunk count for a session
pub fn count_by_session(conn: &Connection, session_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM chunk_embeddings WHERE session_id = ?",
        params![session_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Aggregate chunk counts for the statistics endpoint
pub fn statistics(conn: &Connection) -> Result<VectorStatistics> {
    let (total_chunks, embedded_chunks): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COUNT(embedding) FROM chunk_embeddings",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT session_id, COUNT(*), COUNT(DISTINCT message_id)
         FROM chunk_embeddings GROUP BY session_id ORDER BY session_id",
    )?;
    let sessions = stmt
        .query_map([], |row| {
            Ok(SessionChunkCount {
                session_id: row.get(0)?,
                chunk_count: row.get(1)?,
                message_count: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(VectorStatistics {
        total_chunks,
        embedded_chunks,
        pending_chunks: total_chunks - embedded_chunks,
        sessions,
    })
}
