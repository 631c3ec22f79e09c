//! Pipeline orchestration
//!
//! Glues the stores, window, retriever, merger, prompt builder, and LLM
//! client into the per-turn flow: persist the user turn, gather context,
//! build the prompt, call the LLM, persist the reply, then hand both
//! messages to the background indexer.

mod queue;

pub use queue::{IndexJob, IndexQueue, IndexWorker};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::chunking::Chunker;
use crate::config::TimelineConfig;
use crate::embedding::Embedder;
use crate::error::{Result, TimelineError};
use crate::llm::Completer;
use crate::prompt::{PromptBuilder, SYSTEM_INSTRUCTION};
use crate::retrieval::{self, merge};
use crate::storage::{chunks, messages, Storage};
use crate::summary::Summarizer;
use crate::types::{Message, NewChunk, Role};
use crate::window::ConversationWindow;

/// Per-turn observability counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnMetrics {
    pub retrieved_groups: usize,
    pub merged_groups: usize,
    pub prompt_chars: usize,
    pub included_recent: usize,
    pub included_groups: usize,
    pub summary_included: bool,
    /// True when retrieval was skipped because the embedder was down
    pub retrieval_degraded: bool,
}

/// Result of one handled turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub user: Message,
    pub assistant: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub metrics: TurnMetrics,
}

/// Counts from a session reprocess
#[derive(Debug, Clone, Serialize)]
pub struct ReprocessReport {
    pub messages_processed: usize,
    pub chunks_written: usize,
    pub failures: usize,
}

/// The turn-handling engine
pub struct Pipeline {
    storage: Storage,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    window: Arc<ConversationWindow>,
    chunker: Chunker,
    builder: PromptBuilder,
    config: TimelineConfig,
    queue: IndexQueue,
}

impl Pipeline {
    pub fn new(
        storage: Storage,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        config: TimelineConfig,
    ) -> Result<Self> {
        let chunker = Chunker::new(config.chunk.clone())?;
        let builder = PromptBuilder::new(config.prompt.clone());
        let summarizer = Summarizer::new(completer.clone(), config.window.max_summary_chars);
        let window = Arc::new(ConversationWindow::new(summarizer, config.window.clone()));

        Ok(Self {
            storage,
            embedder,
            completer,
            window,
            chunker,
            builder,
            config,
            queue: IndexQueue::new(),
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn window(&self) -> &Arc<ConversationWindow> {
        &self.window
    }

    pub fn queue(&self) -> &IndexQueue {
        &self.queue
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// Spawn the background index worker; returns its join handle
    pub fn spawn_index_worker(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let worker = IndexWorker::new(
            self.storage.clone(),
            self.embedder.clone(),
            self.chunker.clone(),
            self.queue.clone(),
        );
        tokio::spawn(async move { worker.run(shutdown).await })
    }

    /// Handle one user turn end to end.
    ///
    /// The synchronous path persists the user message, gathers window and
    /// retrieved context, builds the prompt, calls the LLM, and persists
    /// the reply. Indexing of both messages happens in the background and
    /// never affects the response.
    pub async fn handle_user_turn(
        &self,
        session_id: &str,
        text: &str,
        include_prompt: bool,
    ) -> Result<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TimelineError::BadInput("message must not be empty".to_string()));
        }
        if session_id.trim().is_empty() {
            return Err(TimelineError::BadInput("session id must not be empty".to_string()));
        }

        // Chain onto the session's chronological tail
        let parent = self
            .storage
            .with_connection(|conn| messages::last_in_session(conn, session_id))?;
        let user = Message::new(
            session_id,
            Role::User,
            text,
            next_timestamp(parent.as_ref().map(|p| p.timestamp)),
            parent.map(|p| p.id),
        );
        self.storage
            .with_connection(|conn| messages::put(conn, &user))?;

        let ctx = self.window.context(session_id).await;

        let mut metrics = TurnMetrics::default();
        let groups = match retrieval::retrieve(
            &self.storage,
            self.embedder.as_ref(),
            text,
            session_id,
            Some(&user.id),
            &self.config.context,
            &self.config.index,
        )
        .await
        {
            Ok(groups) => groups,
            Err(e @ TimelineError::EmbeddingUnavailable(_)) => {
                // The turn still completes, just without retrieved context
                tracing::warn!(error = %e, "retrieval degraded: continuing without context");
                metrics.retrieval_degraded = true;
                vec![]
            }
            Err(e) => return Err(e),
        };
        metrics.retrieved_groups = groups.len();

        let merged = merge::merge(groups, &self.config.context);
        metrics.merged_groups = merged.len();

        let built = self.builder.build(
            SYSTEM_INSTRUCTION,
            &ctx.summary,
            &ctx.recent_messages,
            &merged,
            text,
        )?;
        metrics.prompt_chars = built.text.chars().count();
        metrics.included_recent = built.included_recent;
        metrics.included_groups = built.included_groups;
        metrics.summary_included = built.summary_included;

        let reply = self.completer.complete(&built.text).await?;

        let assistant = Message::new(
            session_id,
            Role::Assistant,
            reply,
            next_timestamp(Some(user.timestamp)),
            Some(user.id.clone()),
        );
        self.storage
            .with_connection(|conn| messages::put(conn, &assistant))?;

        self.window.append(user.clone()).await;
        self.window.append(assistant.clone()).await;

        self.queue.submit(user.clone()).await?;
        self.queue.submit(assistant.clone()).await?;

        Ok(TurnOutcome {
            user,
            assistant,
            prompt: include_prompt.then_some(built.text),
            metrics,
        })
    }

    /// Diagnostics path: persist the pair and call the LLM with the raw
    /// text, bypassing window, retrieval, and indexing
    pub async fn simple_chat(&self, session_id: &str, text: &str) -> Result<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TimelineError::BadInput("message must not be empty".to_string()));
        }

        let parent = self
            .storage
            .with_connection(|conn| messages::last_in_session(conn, session_id))?;
        let user = Message::new(
            session_id,
            Role::User,
            text,
            next_timestamp(parent.as_ref().map(|p| p.timestamp)),
            parent.map(|p| p.id),
        );
        self.storage
            .with_connection(|conn| messages::put(conn, &user))?;

        let reply = self.completer.complete(text).await?;

        let assistant = Message::new(
            session_id,
            Role::Assistant,
            reply,
            next_timestamp(Some(user.timestamp)),
            Some(user.id.clone()),
        );
        self.storage
            .with_connection(|conn| messages::put(conn, &assistant))?;

        Ok(TurnOutcome {
            user,
            assistant,
            prompt: None,
            metrics: TurnMetrics::default(),
        })
    }

    /// Rebuild one session's chunks synchronously
    pub async fn reprocess_session(&self, session_id: &str) -> Result<ReprocessReport> {
        let session_messages = self
            .storage
            .with_connection(|conn| messages::list_by_session_chrono(conn, session_id))?;

        // Clear everything up front so chunks of deleted messages go too
        self.storage
            .with_connection(|conn| chunks::delete_by_session(conn, session_id))?;

        let mut report = ReprocessReport {
            messages_processed: 0,
            chunks_written: 0,
            failures: 0,
        };
        for message in &session_messages {
            match index_message(&self.storage, self.embedder.as_ref(), &self.chunker, message).await
            {
                Ok(count) => {
                    report.messages_processed += 1;
                    report.chunks_written += count;
                }
                Err(e) => {
                    tracing::error!(message_id = %message.id, error = %e, "reprocess failed");
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    /// Session-scoped top-K chunk search for the query text
    pub async fn search_similar(
        &self,
        session_id: Option<&str>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<crate::types::ChunkHit>> {
        if query.trim().is_empty() {
            return Err(TimelineError::BadInput("query must not be empty".to_string()));
        }
        let vector = self.embedder.embed(query).await?;
        let index_config = self.config.index.clone();
        let query = query.to_string();
        let session_id = session_id.map(String::from);
        self.storage.with_connection(move |conn| match session_id {
            Some(session_id) => crate::index::search_in_session(
                conn,
                &session_id,
                &vector,
                &query,
                limit,
                None,
                &index_config,
            ),
            None => crate::index::search_global(conn, &vector, &query, limit, &index_config),
        })
    }

    /// All session chunks scoring at or above the threshold
    pub async fn search_threshold(
        &self,
        session_id: &str,
        query: &str,
        threshold: f32,
    ) -> Result<Vec<crate::types::ChunkHit>> {
        if query.trim().is_empty() {
            return Err(TimelineError::BadInput("query must not be empty".to_string()));
        }
        let vector = self.embedder.embed(query).await?;
        let index_config = self.config.index.clone();
        let query = query.to_string();
        let session_id = session_id.to_string();
        self.storage.with_connection(move |conn| {
            crate::index::search_with_threshold(
                conn,
                &session_id,
                &vector,
                &query,
                threshold,
                &index_config,
            )
        })
    }

    /// Backend identifiers for the health report
    pub fn backends(&self) -> (String, String) {
        (
            self.embedder.model_name().to_string(),
            self.completer.model_name().to_string(),
        )
    }

    /// Queue indexing for every message that has no embedded chunks yet
    pub async fn process_unindexed(&self) -> Result<usize> {
        let pending = self.storage.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM messages m
                 WHERE NOT EXISTS (
                     SELECT 1 FROM chunk_embeddings c
                     WHERE c.message_id = m.id AND c.embedding IS NOT NULL
                 )
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })?;

        let mut queued = 0;
        for id in pending {
            let message = self
                .storage
                .with_connection(|conn| messages::get_by_id(conn, &id))?;
            self.queue.submit(message).await?;
            queued += 1;
        }
        Ok(queued)
    }
}

/// Next message timestamp: now, nudged forward if the chain tail is newer.
/// Keeps timestamps strictly increasing within a session.
fn next_timestamp(after: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match after {
        Some(t) if now <= t => t + Duration::microseconds(1),
        _ => now,
    }
}

/// Chunk, embed, and store one message's fragments.
///
/// Idempotent over `(message_id, chunk_index)`: prior chunks of the message
/// are deleted before reinsert. Fragments that fail to embed are stored as
/// pending so a later reprocess can pick them up, and the error surfaces to
/// the caller for logging or retry.
pub async fn index_message(
    storage: &Storage,
    embedder: &dyn Embedder,
    chunker: &Chunker,
    message: &Message,
) -> Result<usize> {
    let fragments = chunker.chunk(&message.content);

    let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(fragments.len());
    let mut embed_error: Option<TimelineError> = None;
    for fragment in &fragments {
        if embed_error.is_some() {
            vectors.push(None);
            continue;
        }
        match embedder.embed(fragment).await {
            Ok(vector) => vectors.push(Some(vector)),
            Err(e) => {
                vectors.push(None);
                embed_error = Some(e);
            }
        }
    }

    let rows: Vec<NewChunk> = fragments
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(chunk_index, (text, vector))| NewChunk {
            message_id: message.id.clone(),
            session_id: message.session_id.clone(),
            chunk_index,
            text,
            vector,
            timestamp: message.timestamp,
        })
        .collect();

    let written = storage.with_transaction(|conn| {
        chunks::delete_by_message(conn, &message.id)?;
        chunks::put_batch(conn, &rows)
    })?;

    match embed_error {
        Some(e) => Err(e),
        None => Ok(written),
    }
}
