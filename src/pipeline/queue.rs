//! Background indexing queue
//!
//! Messages are chunked and embedded off the request path so response
//! latency never waits on the embedding endpoint. Delivery is at-least-once
//! and the indexing operation itself is idempotent, so a duplicate job is
//! harmless. The worker honors the process shutdown signal and drains the
//! queue before exiting.

use async_channel::{bounded, Receiver, Sender};
use tokio::sync::watch;

use super::index_message;
use crate::chunking::Chunker;
use crate::embedding::Embedder;
use crate::error::{Result, TimelineError};
use crate::storage::Storage;
use crate::types::Message;
use std::sync::Arc;

/// A unit of background indexing work
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub message: Message,
}

/// Producer half of the indexing queue
pub struct IndexQueue {
    sender: Sender<IndexJob>,
    receiver: Receiver<IndexJob>,
}

impl IndexQueue {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(10_000);
        Self { sender, receiver }
    }

    /// Queue a message for indexing
    pub async fn submit(&self, message: Message) -> Result<()> {
        self.sender
            .send(IndexJob { message })
            .await
            .map_err(|e| TimelineError::Internal(format!("Index queue send error: {}", e)))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    fn receiver(&self) -> Receiver<IndexJob> {
        self.receiver.clone()
    }
}

impl Default for IndexQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for IndexQueue {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

/// Background worker draining the indexing queue
pub struct IndexWorker {
    storage: Storage,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    queue: IndexQueue,
}

impl IndexWorker {
    pub fn new(
        storage: Storage,
        embedder: Arc<dyn Embedder>,
        chunker: Chunker,
        queue: IndexQueue,
    ) -> Self {
        Self {
            storage,
            embedder,
            chunker,
            queue,
        }
    }

    /// Run until shutdown is signaled, then drain the remaining jobs
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let receiver = self.queue.receiver();

        loop {
            tokio::select! {
                job = receiver.recv() => {
                    match job {
                        Ok(job) => self.process(job).await,
                        Err(_) => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Drain whatever is still queued before exit
        while let Ok(job) = receiver.try_recv() {
            self.process(job).await;
        }
    }

    async fn process(&self, job: IndexJob) {
        let message_id = job.message.id.clone();
        match index_message(&self.storage, self.embedder.as_ref(), &self.chunker, &job.message).await
        {
            Ok(chunk_count) => {
                tracing::debug!(message_id = %message_id, chunk_count, "indexed message");
            }
            Err(e) => {
                // The response already went out; indexing failures only log
                tracing::error!(message_id = %message_id, error = %e, "background indexing failed");
            }
        }
    }
}
