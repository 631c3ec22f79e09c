//! Message store queries
//!
//! Messages are immutable after insert except for the parent link, which
//! chain repair may rewrite. Timestamps are stored as RFC 3339 with
//! microsecond precision so lexicographic and chronological order agree.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, TimelineError};
use crate::types::{Message, Role};

/// Serialize a timestamp for storage
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a message from a database row
pub fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    let role_str: String = row.get("role")?;
    let timestamp: String = row.get("timestamp")?;
    Ok(Message {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        role: role_str.parse().unwrap_or(Role::User),
        content: row.get("content")?,
        timestamp: parse_timestamp(&timestamp),
        parent_message_id: row.get("parent_message_id")?,
    })
}

/// Persist a message; fails with `DUPLICATE` if the id already exists
pub fn put(conn: &Connection, message: &Message) -> Result<()> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM messages WHERE id = ?",
            params![message.id],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Err(TimelineError::Duplicate(message.id.clone()));
    }

    conn.execute(
        "INSERT INTO messages (id, session_id, role, content, timestamp, parent_message_id)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            message.id,
            message.session_id,
            message.role.to_string(),
            message.content,
            format_timestamp(&message.timestamp),
            message.parent_message_id,
        ],
    )?;
    Ok(())
}

/// Fetch a message by id
pub fn get_by_id(conn: &Connection, id: &str) -> Result<Message> {
    conn.query_row(
        "SELECT id, session_id, role, content, timestamp, parent_message_id
         FROM messages WHERE id = ?",
        params![id],
        message_from_row,
    )
    .optional()?
    .ok_or_else(|| TimelineError::NotFound(format!("message {}", id)))
}

/// All messages for a session, storage order
pub fn list_by_session(conn: &Connection, session_id: &str) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, role, content, timestamp, parent_message_id
         FROM messages WHERE session_id = ?",
    )?;
    let messages = stmt
        .query_map(params![session_id], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(messages)
}

/// All messages for a session ordered by timestamp ascending, ties by id
pub fn list_by_session_chrono(conn: &Connection, session_id: &str) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, role, content, timestamp, parent_message_id
         FROM messages WHERE session_id = ?
         ORDER BY timestamp ASC, id ASC",
    )?;
    let messages = stmt
        .query_map(params![session_id], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(messages)
}

/// Every stored message, timestamp-ordered
pub fn list_all(conn: &Connection) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, role, content, timestamp, parent_message_id
         FROM messages ORDER BY timestamp ASC, id ASC",
    )?;
    let messages = stmt
        .query_map([], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(messages)
}

/// Chronological tail of a session, if any
pub fn last_in_session(conn: &Connection, session_id: &str) -> Result<Option<Message>> {
    let message = conn
        .query_row(
            "SELECT id, session_id, role, content, timestamp, parent_message_id
             FROM messages WHERE session_id = ?
             ORDER BY timestamp DESC, id DESC LIMIT 1",
            params![session_id],
            message_from_row,
        )
        .optional()?;
    Ok(message)
}

/// Rewrite a message's parent link (chain repair only)
pub fn update_parent(conn: &Connection, id: &str, parent_id: Option<&str>) -> Result<()> {
    let updated = conn.execute(
        "UPDATE messages SET parent_message_id = ? WHERE id = ?",
        params![parent_id, id],
    )?;
    if updated == 0 {
        return Err(TimelineError::NotFound(format!("message {}", id)));
    }
    Ok(())
}

/// Best-effort bulk delete; returns the number of rows removed
pub fn delete_by_session(conn: &Connection, session_id: &str) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM messages WHERE session_id = ?",
        params![session_id],
    )?;
    Ok(deleted)
}
