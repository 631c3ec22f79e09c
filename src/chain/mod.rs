//! Parent-link chain validation and repair
//!
//! A session's messages form a chain through `parent_message_id`. Deletions
//! or partial writes can leave dangling parent references and unreachable
//! messages; `validate` reports them and `repair` relinks each one to the
//! most recent prior message by timestamp. Findings are reports, not errors.

use std::collections::{HashMap, HashSet, VecDeque};

use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;
use crate::storage::messages;
use crate::types::Message;

/// Validation outcome for one session
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub valid: bool,
    /// Messages whose parent reference points at a nonexistent id
    pub broken_parent_ids: Vec<String>,
    /// Messages unreachable from any root
    pub orphan_ids: Vec<String>,
    pub root_count: usize,
    pub total_count: usize,
    pub warnings: Vec<String>,
}

/// A single relink performed by `repair`
#[derive(Debug, Clone, Serialize)]
pub struct RepairedLink {
    pub message_id: String,
    pub new_parent_id: Option<String>,
}

/// Repair outcome: what changed, and the post-repair validation
#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub repaired: Vec<RepairedLink>,
    pub report: ChainReport,
}

fn build_report(chrono: &[Message]) -> ChainReport {
    let ids: HashSet<&str> = chrono.iter().map(|m| m.id.as_str()).collect();

    let mut broken_parent_ids = Vec::new();
    let mut roots = Vec::new();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();

    for message in chrono {
        match message.parent_message_id.as_deref() {
            None => roots.push(message.id.as_str()),
            Some(parent) if ids.contains(parent) => {
                children.entry(parent).or_default().push(message.id.as_str());
            }
            Some(_) => broken_parent_ids.push(message.id.clone()),
        }
    }

    // Reachability from the roots over intact links
    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = roots.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        if !reached.insert(id) {
            continue;
        }
        if let Some(kids) = children.get(id) {
            queue.extend(kids.iter().copied());
        }
    }

    let orphan_ids: Vec<String> = chrono
        .iter()
        .filter(|m| !reached.contains(m.id.as_str()))
        .map(|m| m.id.clone())
        .collect();

    let mut warnings = Vec::new();
    if roots.len() > 1 {
        warnings.push(format!("session has {} roots", roots.len()));
    }
    if roots.is_empty() && !chrono.is_empty() {
        warnings.push("session has no root message".to_string());
    }

    ChainReport {
        valid: broken_parent_ids.is_empty() && orphan_ids.is_empty(),
        broken_parent_ids,
        orphan_ids,
        root_count: roots.len(),
        total_count: chrono.len(),
        warnings,
    }
}

/// Validate a session's chain
pub fn validate(conn: &Connection, session_id: &str) -> Result<ChainReport> {
    let chrono = messages::list_by_session_chrono(conn, session_id)?;
    Ok(build_report(&chrono))
}

/// Relink broken and orphaned messages to their chronological predecessor,
/// then re-validate. Idempotent: a valid chain repairs to itself.
pub fn repair(conn: &Connection, session_id: &str) -> Result<RepairOutcome> {
    let chrono = messages::list_by_session_chrono(conn, session_id)?;
    let report = build_report(&chrono);

    let mut needs_repair: Vec<&str> = report
        .broken_parent_ids
        .iter()
        .chain(report.orphan_ids.iter())
        .map(String::as_str)
        .collect();
    needs_repair.sort_unstable();
    needs_repair.dedup();

    let mut repaired = Vec::new();
    for (position, message) in chrono.iter().enumerate() {
        if !needs_repair.contains(&message.id.as_str()) {
            continue;
        }
        let new_parent = if position == 0 {
            None
        } else {
            Some(chrono[position - 1].id.clone())
        };
        if message.parent_message_id != new_parent {
            messages::update_parent(conn, &message.id, new_parent.as_deref())?;
            repaired.push(RepairedLink {
                message_id: message.id.clone(),
                new_parent_id: new_parent,
            });
        }
    }

    let report = validate(conn, session_id)?;
    Ok(RepairOutcome { repaired, report })
}

/// Chain-traversed session history: roots first, then parent-link order.
/// Messages unreachable from any root are appended in chronological order.
pub fn traverse(conn: &Connection, session_id: &str) -> Result<Vec<Message>> {
    let chrono = messages::list_by_session_chrono(conn, session_id)?;
    let by_id: HashMap<&str, &Message> = chrono.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut roots: Vec<&str> = Vec::new();
    for message in &chrono {
        match message.parent_message_id.as_deref() {
            Some(parent) if by_id.contains_key(parent) => {
                children.entry(parent).or_default().push(message.id.as_str());
            }
            _ if message.parent_message_id.is_none() => roots.push(message.id.as_str()),
            _ => {}
        }
    }

    let mut ordered: Vec<Message> = Vec::with_capacity(chrono.len());
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = roots.into_iter().rev().collect();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(message) = by_id.get(id) {
            ordered.push((*message).clone());
        }
        if let Some(kids) = children.get(id) {
            // Children are already in chronological order; reverse for the stack
            stack.extend(kids.iter().rev().copied());
        }
    }

    for message in &chrono {
        if !seen.contains(message.id.as_str()) {
            ordered.push(message.clone());
        }
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::messages::put;
    use crate::storage::Storage;
    use crate::types::{Message, Role};
    use chrono::{Duration, Utc};

    fn insert(conn: &Connection, content: &str, offset_us: i64, parent: Option<&str>) -> Message {
        let m = Message::new(
            "s1",
            Role::User,
            content,
            Utc::now() + Duration::microseconds(offset_us),
            parent.map(String::from),
        );
        put(conn, &m).unwrap();
        m
    }

    #[test]
    fn test_valid_chain() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let a = insert(conn, "a", 0, None);
                let b = insert(conn, "b", 10, Some(&a.id));
                insert(conn, "c", 20, Some(&b.id));

                let report = validate(conn, "s1")?;
                assert!(report.valid);
                assert_eq!(report.root_count, 1);
                assert_eq!(report.total_count, 3);
                assert!(report.warnings.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_broken_reference_detected_and_repaired() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                // a -> b -> c, then b disappears
                let a = insert(conn, "a", 0, None);
                let b = insert(conn, "b", 10, Some(&a.id));
                let c = insert(conn, "c", 20, Some(&b.id));
                conn.execute("DELETE FROM messages WHERE id = ?", [&b.id])?;

                let report = validate(conn, "s1")?;
                assert!(!report.valid);
                assert_eq!(report.broken_parent_ids, vec![c.id.clone()]);
                assert_eq!(report.orphan_ids, vec![c.id.clone()]);

                let outcome = repair(conn, "s1")?;
                assert!(outcome.report.valid);
                assert_eq!(outcome.repaired.len(), 1);
                assert_eq!(outcome.repaired[0].new_parent_id, Some(a.id.clone()));

                // Idempotent: a second repair changes nothing
                let again = repair(conn, "s1")?;
                assert!(again.repaired.is_empty());
                assert!(again.report.valid);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_multiple_roots_warn_but_pass() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                insert(conn, "a", 0, None);
                insert(conn, "b", 10, None);

                let report = validate(conn, "s1")?;
                assert!(report.valid);
                assert_eq!(report.root_count, 2);
                assert_eq!(report.warnings.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_traverse_follows_chain() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let a = insert(conn, "a", 0, None);
                let b = insert(conn, "b", 10, Some(&a.id));
                insert(conn, "c", 20, Some(&b.id));

                let ordered = traverse(conn, "s1")?;
                let contents: Vec<&str> = ordered.iter().map(|m| m.content.as_str()).collect();
                assert_eq!(contents, vec!["a", "b", "c"]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_empty_session_is_valid() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let report = validate(conn, "empty")?;
                assert!(report.valid);
                assert_eq!(report.total_count, 0);
                Ok(())
            })
            .unwrap();
    }
}
