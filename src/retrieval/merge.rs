//! Merging of expanded groups into context groups
//!
//! Within one message, expanded neighborhoods can overlap or sit next to
//! each other; those merge into a single context group holding the sorted
//! union of their chunks. Output order is chronological so prompt order
//! matches conversation order. Two caps apply: the total-chunk cap trims
//! the lowest-scoring group's tail chunks first, then the group-count cap
//! drops lowest-scoring whole groups.

use std::collections::{BTreeMap, HashMap};

use crate::config::RetrievalConfig;
use crate::types::{ChunkEmbedding, ContextGroup, ExpandedGroup};

struct PendingGroup {
    message_id: String,
    chunks: BTreeMap<usize, ChunkEmbedding>,
    low: usize,
    high: usize,
    score: f32,
}

impl PendingGroup {
    fn from_group(group: ExpandedGroup) -> Option<Self> {
        let low = group.chunks.first()?.chunk_index;
        let high = group.chunks.last()?.chunk_index;
        let chunks = group
            .chunks
            .into_iter()
            .map(|c| (c.chunk_index, c))
            .collect();
        Some(Self {
            message_id: group.message_id,
            chunks,
            low,
            high,
            score: group.hit_score,
        })
    }

    /// Ranges touch when they overlap or are adjacent
    fn touches(&self, other: &Self) -> bool {
        other.low <= self.high + 1 && self.low <= other.high + 1
    }

    fn absorb(&mut self, other: Self) {
        self.low = self.low.min(other.low);
        self.high = self.high.max(other.high);
        self.score = self.score.max(other.score);
        self.chunks.extend(other.chunks);
    }

    fn finalize(self) -> Option<ContextGroup> {
        let chunks: Vec<ChunkEmbedding> = self.chunks.into_values().collect();
        let earliest = chunks.iter().map(|c| c.timestamp).min()?;
        let latest = chunks.iter().map(|c| c.timestamp).max()?;
        Some(ContextGroup {
            message_id: self.message_id,
            chunks,
            score: self.score,
            earliest_timestamp: earliest,
            latest_timestamp: latest,
        })
    }
}

/// Merge expanded groups and enforce the configured caps
pub fn merge(groups: Vec<ExpandedGroup>, config: &RetrievalConfig) -> Vec<ContextGroup> {
    let mut by_message: HashMap<String, Vec<PendingGroup>> = HashMap::new();
    for group in groups {
        if let Some(pending) = PendingGroup::from_group(group) {
            by_message
                .entry(pending.message_id.clone())
                .or_default()
                .push(pending);
        }
    }

    let mut merged: Vec<ContextGroup> = Vec::new();
    for (_, mut pending) in by_message {
        pending.sort_by_key(|p| p.low);
        let mut current: Option<PendingGroup> = None;
        for group in pending {
            match current.take() {
                Some(mut acc) if acc.touches(&group) => {
                    acc.absorb(group);
                    current = Some(acc);
                }
                Some(done) => {
                    merged.extend(done.finalize());
                    current = Some(group);
                }
                None => current = Some(group),
            }
        }
        merged.extend(current.and_then(PendingGroup::finalize));
    }

    // Prompt order matches conversation order
    merged.sort_by(|a, b| {
        a.earliest_timestamp
            .cmp(&b.earliest_timestamp)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });

    enforce_total_chunk_cap(&mut merged, config.max_total_chunks);
    enforce_group_cap(&mut merged, config.max_groups);

    merged
}

/// Trim tail chunks from the lowest-scoring groups until under the cap
fn enforce_total_chunk_cap(groups: &mut Vec<ContextGroup>, max_total_chunks: usize) {
    let mut total: usize = groups.iter().map(|g| g.chunks.len()).sum();
    while total > max_total_chunks {
        let Some(victim) = groups
            .iter_mut()
            .filter(|g| !g.chunks.is_empty())
            .min_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        else {
            break;
        };
        victim.chunks.pop();
        total -= 1;
    }
    groups.retain(|g| !g.chunks.is_empty());
}

/// Drop lowest-scoring whole groups until under the cap
fn enforce_group_cap(groups: &mut Vec<ContextGroup>, max_groups: usize) {
    while groups.len() > max_groups {
        let Some((position, _)) = groups.iter().enumerate().min_by(|(_, a), (_, b)| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            break;
        };
        groups.remove(position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn chunk(message: &str, index: usize, ts: DateTime<Utc>) -> ChunkEmbedding {
        ChunkEmbedding {
            chunk_id: index as i64,
            message_id: message.to_string(),
            session_id: "s1".to_string(),
            chunk_index: index,
            text: format!("{} chunk {}", message, index),
            vector: None,
            timestamp: ts,
        }
    }

    fn group(message: &str, indices: &[usize], score: f32, ts: DateTime<Utc>) -> ExpandedGroup {
        ExpandedGroup {
            message_id: message.to_string(),
            chunks: indices.iter().map(|&i| chunk(message, i, ts)).collect(),
            hit_score: score,
            hit_index: indices[indices.len() / 2],
        }
    }

    #[test]
    fn test_overlapping_groups_merge() {
        let ts = Utc::now();
        let merged = merge(
            vec![
                group("m1", &[0, 1, 2], 0.8, ts),
                group("m1", &[2, 3, 4], 0.9, ts),
            ],
            &RetrievalConfig::default(),
        );
        assert_eq!(merged.len(), 1);
        let indices: Vec<usize> = merged[0].chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(merged[0].score, 0.9);
    }

    #[test]
    fn test_adjacent_groups_merge() {
        let ts = Utc::now();
        let merged = merge(
            vec![group("m1", &[0, 1], 0.8, ts), group("m1", &[2, 3], 0.7, ts)],
            &RetrievalConfig::default(),
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].chunks.len(), 4);
    }

    #[test]
    fn test_disjoint_groups_stay_separate() {
        let ts = Utc::now();
        let merged = merge(
            vec![group("m1", &[0, 1], 0.8, ts), group("m1", &[5, 6], 0.7, ts)],
            &RetrievalConfig::default(),
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_chronological_output_order() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(60);
        let merged = merge(
            vec![
                group("newer", &[0, 1], 0.95, t1),
                group("older", &[0, 1], 0.5, t0),
            ],
            &RetrievalConfig::default(),
        );
        assert_eq!(merged[0].message_id, "older");
        assert_eq!(merged[1].message_id, "newer");
        assert_eq!(merged[0].earliest_timestamp, t0);
    }

    #[test]
    fn test_total_chunk_cap_trims_lowest_scoring_tail() {
        let ts = Utc::now();
        let config = RetrievalConfig {
            max_total_chunks: 5,
            ..Default::default()
        };
        let merged = merge(
            vec![
                group("strong", &[0, 1, 2], 0.9, ts),
                group("weak", &[0, 1, 2, 3], 0.2, ts + Duration::seconds(1)),
            ],
            &config,
        );
        let strong = merged.iter().find(|g| g.message_id == "strong").unwrap();
        let weak = merged.iter().find(|g| g.message_id == "weak").unwrap();
        assert_eq!(strong.chunks.len(), 3);
        assert_eq!(weak.chunks.len(), 2);
    }

    #[test]
    fn test_group_cap_drops_lowest_scoring() {
        let ts = Utc::now();
        let config = RetrievalConfig {
            max_groups: 2,
            ..Default::default()
        };
        let merged = merge(
            vec![
                group("a", &[0], 0.9, ts),
                group("b", &[0], 0.1, ts + Duration::seconds(1)),
                group("c", &[0], 0.5, ts + Duration::seconds(2)),
            ],
            &config,
        );
        let ids: Vec<&str> = merged.iter().map(|g| g.message_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(merge(vec![], &RetrievalConfig::default()).is_empty());
    }
}
