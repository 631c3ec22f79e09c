//! End-to-end pipeline tests
//!
//! Exercise the whole turn flow against in-memory storage, the local
//! deterministic embedder, and scripted completion fakes.
//!
//! Run with: cargo test --test pipeline_tests

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::watch;

use timeline::config::{PromptConfig, TimelineConfig, WindowConfig};
use timeline::embedding::{Embedder, HashEmbedder};
use timeline::error::{Result, TimelineError};
use timeline::llm::Completer;
use timeline::pipeline::{index_message, Pipeline};
use timeline::storage::{chunks, messages, Storage};
use timeline::{chain, chunking, index};

const EMBED_DIM: usize = 64;

/// Scripted completer: summarization prompts echo the folded turns back so
/// tests can assert summary content; chat prompts get a fixed reply.
struct FakeCompleter;

#[async_trait]
impl Completer for FakeCompleter {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Some(rest) = prompt.split("New conversation turns to incorporate:\n").nth(1) {
            let folded = rest.split("\nReply with").next().unwrap_or(rest).trim();
            let previous = prompt
                .split("Current summary:\n")
                .nth(1)
                .and_then(|s| s.split("\n\nNew conversation").next())
                .unwrap_or("")
                .trim();
            return Ok(format!("{} {}", previous, folded).trim().to_string());
        }
        Ok("Understood.".to_string())
    }

    fn model_name(&self) -> &str {
        "fake"
    }
}

struct DownCompleter;

#[async_trait]
impl Completer for DownCompleter {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(TimelineError::LlmUnavailable("scripted outage".to_string()))
    }

    fn model_name(&self) -> &str {
        "down"
    }
}

fn pipeline_with(config: TimelineConfig, completer: Arc<dyn Completer>) -> Pipeline {
    let storage = Storage::open_in_memory().unwrap();
    let embedder = Arc::new(HashEmbedder::new(EMBED_DIM));
    Pipeline::new(storage, embedder, completer, config).unwrap()
}

fn default_pipeline() -> Pipeline {
    pipeline_with(TimelineConfig::default(), Arc::new(FakeCompleter))
}

/// Drain the background indexing queue deterministically
async fn drain_indexing(pipeline: &Pipeline) {
    let (tx, rx) = watch::channel(false);
    let worker = pipeline.spawn_index_worker(rx);
    tx.send(true).unwrap();
    worker.await.unwrap();
}

// S1 - first turn on an empty session
#[tokio::test]
async fn first_turn_on_empty_session() {
    let pipeline = default_pipeline();

    let outcome = pipeline
        .handle_user_turn("s1", "My name is Alice and I live in Paris.", true)
        .await
        .unwrap();

    assert_eq!(outcome.user.parent_message_id, None);
    assert_eq!(outcome.assistant.parent_message_id, Some(outcome.user.id.clone()));
    assert_eq!(outcome.metrics.merged_groups, 0);

    let prompt = outcome.prompt.as_deref().unwrap();
    assert!(prompt.contains("My name is Alice and I live in Paris."));
    assert!(prompt.contains("Retrieved context:"));

    drain_indexing(&pipeline).await;

    pipeline
        .storage()
        .with_connection(|conn| {
            let rows = chunks::get_by_message(conn, &outcome.user.id)?;
            assert!(!rows.is_empty());
            for row in rows {
                assert_eq!(row.vector.as_ref().map(Vec::len), Some(EMBED_DIM));
            }
            Ok(())
        })
        .unwrap();
}

// S2 - recall within the window
#[tokio::test]
async fn recall_within_window() {
    let pipeline = default_pipeline();

    pipeline
        .handle_user_turn("s1", "My name is Alice and I live in Paris.", false)
        .await
        .unwrap();
    drain_indexing(&pipeline).await;

    let outcome = pipeline
        .handle_user_turn("s1", "What's my name?", true)
        .await
        .unwrap();

    let prompt = outcome.prompt.as_deref().unwrap();
    assert!(prompt.contains("My name is Alice and I live in Paris."));

    let ctx = pipeline.window().context("s1").await;
    assert_eq!(ctx.recent_messages.len(), 4);
}

// S3 - summarization triggers once the window overflows
#[tokio::test]
async fn summarization_trigger() {
    let config = TimelineConfig {
        window: WindowConfig {
            size: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let pipeline = pipeline_with(config, Arc::new(FakeCompleter));

    let turns = [
        "Turn one is about alpha particles.",
        "Turn two covers beta decay.",
        "Turn three concerns gamma rays.",
        "Turn four is about delta waves.",
    ];
    for turn in turns {
        pipeline.handle_user_turn("s1", turn, false).await.unwrap();
    }

    let ctx = pipeline.window().context("s1").await;
    assert_eq!(ctx.recent_messages.len(), 2);
    assert!(!ctx.summary.is_empty());
    assert!(ctx.summary.contains("alpha particles"));
}

// S4 - similarity exclusion of the current message
#[tokio::test]
async fn similarity_exclusion() {
    let storage = Storage::open_in_memory().unwrap();
    let embedder = HashEmbedder::new(EMBED_DIM);
    let chunker =
        chunking::Chunker::new(timeline::config::ChunkConfig::default()).unwrap();

    let content = "The reactor core temperature was nominal this morning.";
    let message = timeline::Message::new("s1", timeline::Role::User, content, chrono::Utc::now(), None);
    storage
        .with_connection(|conn| messages::put(conn, &message))
        .unwrap();
    index_message(&storage, &embedder, &chunker, &message)
        .await
        .unwrap();

    let query_vector = embedder.embed(content).await.unwrap();
    let hits = storage
        .with_connection(|conn| {
            index::search_in_session(
                conn,
                "s1",
                &query_vector,
                content,
                10,
                Some(&message.id),
                &timeline::config::IndexConfig::default(),
            )
        })
        .unwrap();
    assert!(hits.is_empty());
}

// S5 - broken chain detection and repair
#[tokio::test]
async fn broken_chain_repair() {
    let pipeline = default_pipeline();

    pipeline.handle_user_turn("s1", "first turn", false).await.unwrap();
    pipeline.handle_user_turn("s1", "second turn", false).await.unwrap();

    // Remove a mid-chain message to break the parent link
    let ordered = pipeline
        .storage()
        .with_connection(|conn| messages::list_by_session_chrono(conn, "s1"))
        .unwrap();
    assert_eq!(ordered.len(), 4);
    let removed = ordered[1].id.clone();
    pipeline
        .storage()
        .with_connection(|conn| {
            conn.execute("DELETE FROM messages WHERE id = ?", [&removed])?;
            Ok(())
        })
        .unwrap();

    let report = pipeline
        .storage()
        .with_connection(|conn| chain::validate(conn, "s1"))
        .unwrap();
    assert!(!report.valid);
    assert_eq!(report.broken_parent_ids.len(), 1);

    let outcome = pipeline
        .storage()
        .with_connection(|conn| chain::repair(conn, "s1"))
        .unwrap();
    assert!(outcome.report.valid);
    assert!(!outcome.repaired.is_empty());
}

// S6 - prompt overflow fails the turn without persisting a reply
#[tokio::test]
async fn prompt_overflow() {
    let config = TimelineConfig {
        prompt: PromptConfig {
            max_length: 200,
            ..Default::default()
        },
        ..Default::default()
    };
    let pipeline = pipeline_with(config, Arc::new(FakeCompleter));

    let oversized = "x".repeat(500);
    let result = pipeline.handle_user_turn("s1", &oversized, false).await;
    assert!(matches!(
        result,
        Err(TimelineError::PromptOverflow { .. })
    ));

    let stored = pipeline
        .storage()
        .with_connection(|conn| messages::list_by_session_chrono(conn, "s1"))
        .unwrap();
    // The user message is persisted before the overflow; no assistant reply is
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, timeline::Role::User);
}

#[tokio::test]
async fn llm_outage_fails_turn_but_keeps_user_message() {
    let pipeline = pipeline_with(TimelineConfig::default(), Arc::new(DownCompleter));

    let result = pipeline.handle_user_turn("s1", "hello there", false).await;
    assert!(matches!(result, Err(TimelineError::LlmUnavailable(_))));

    let stored = pipeline
        .storage()
        .with_connection(|conn| messages::list_by_session_chrono(conn, "s1"))
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "hello there");
}

#[tokio::test]
async fn empty_message_is_bad_input() {
    let pipeline = default_pipeline();
    let result = pipeline.handle_user_turn("s1", "   ", false).await;
    assert!(matches!(result, Err(TimelineError::BadInput(_))));
}

#[tokio::test]
async fn chain_chronology_invariant() {
    let pipeline = default_pipeline();
    for turn in ["one", "two", "three"] {
        pipeline.handle_user_turn("s1", turn, false).await.unwrap();
    }

    let ordered = pipeline
        .storage()
        .with_connection(|conn| messages::list_by_session_chrono(conn, "s1"))
        .unwrap();
    for message in &ordered {
        if let Some(parent_id) = &message.parent_message_id {
            let parent = ordered.iter().find(|m| &m.id == parent_id).unwrap();
            assert!(message.timestamp > parent.timestamp);
            assert_eq!(message.session_id, parent.session_id);
        }
    }
}

#[tokio::test]
async fn reprocess_is_idempotent() {
    let pipeline = default_pipeline();
    pipeline
        .handle_user_turn("s1", "Some message long enough to index.", false)
        .await
        .unwrap();
    drain_indexing(&pipeline).await;

    let ordinals = |pipeline: &Pipeline| {
        pipeline
            .storage()
            .with_connection(|conn| {
                let rows = chunks::list_by_session(conn, "s1")?;
                Ok(rows
                    .into_iter()
                    .map(|c| (c.message_id, c.chunk_index))
                    .collect::<Vec<_>>())
            })
            .unwrap()
    };

    let before = ordinals(&pipeline);
    let report = pipeline.reprocess_session("s1").await.unwrap();
    assert_eq!(report.failures, 0);
    let after = ordinals(&pipeline);
    assert_eq!(before, after);
}

#[tokio::test]
async fn simple_chat_bypasses_window() {
    let pipeline = default_pipeline();
    let outcome = pipeline.simple_chat("s1", "diagnostic ping").await.unwrap();
    assert_eq!(outcome.assistant.parent_message_id, Some(outcome.user.id.clone()));

    // The window never saw either message
    let ctx = pipeline.window().context("s1").await;
    assert!(ctx.recent_messages.is_empty());
}
