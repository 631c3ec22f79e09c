//! Rolling per-session conversation windows
//!
//! Each session keeps its last `window.size` messages verbatim plus a
//! running summary of everything older. Eviction folds the popped messages
//! into the summary before they leave the window, so the summary observed
//! by the next `context()` call always covers them. A periodic sweep drops
//! sessions idle past the retention age.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{watch, Mutex};

use crate::config::WindowConfig;
use crate::summary::Summarizer;
use crate::types::{Message, WindowContext};

struct SessionWindow {
    recent: VecDeque<Message>,
    summary: String,
    last_summarized_at: Option<DateTime<Utc>>,
    last_touched: DateTime<Utc>,
}

impl SessionWindow {
    fn new() -> Self {
        Self {
            recent: VecDeque::new(),
            summary: String::new(),
            last_summarized_at: None,
            last_touched: Utc::now(),
        }
    }
}

/// Owner of all per-session window state
pub struct ConversationWindow {
    sessions: DashMap<String, Arc<Mutex<SessionWindow>>>,
    summarizer: Summarizer,
    config: WindowConfig,
}

impl ConversationWindow {
    pub fn new(summarizer: Summarizer, config: WindowConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            summarizer,
            config,
        }
    }

    fn entry(&self, session_id: &str) -> Arc<Mutex<SessionWindow>> {
        // Clone the Arc out so no map guard is held across an await
        Arc::clone(
            self.sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SessionWindow::new())))
                .value(),
        )
    }

    /// Append a message, folding overflow into the summary before eviction
    pub async fn append(&self, message: Message) {
        let entry = self.entry(&message.session_id);
        let mut window = entry.lock().await;

        window.recent.push_back(message);
        window.last_touched = Utc::now();

        let mut evicted = Vec::new();
        while window.recent.len() > self.config.size {
            if let Some(old) = window.recent.pop_front() {
                evicted.push(old);
            }
        }

        if !evicted.is_empty() {
            let folded = self.summarizer.fold(&window.summary, &evicted).await;
            window.summary = folded;
            window.last_summarized_at = Some(Utc::now());
        }
    }

    /// Current window state; both parts empty for unknown sessions
    pub async fn context(&self, session_id: &str) -> WindowContext {
        let Some(entry) = self.sessions.get(session_id).map(|e| Arc::clone(e.value())) else {
            return WindowContext::default();
        };
        let mut window = entry.lock().await;
        window.last_touched = Utc::now();
        WindowContext {
            recent_messages: window.recent.iter().cloned().collect(),
            summary: window.summary.clone(),
            last_summarized_at: window.last_summarized_at,
        }
    }

    /// Drop a session's window state
    pub fn clear(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Number of tracked sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Evict sessions idle past the retention age; returns how many
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(self.config.max_age_hours as i64);
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| {
            // An entry locked mid-append is in use; keep it this round
            match entry.try_lock() {
                Ok(window) => window.last_touched >= cutoff,
                Err(_) => true,
            }
        });
        before - self.sessions.len()
    }

    /// Run the retention sweep until shutdown is signaled
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.cleanup_interval_minutes.max(1) * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.sweep();
                    if evicted > 0 {
                        tracing::info!(evicted, "window retention sweep");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::Completer;
    use crate::types::Role;
    use async_trait::async_trait;

    struct EchoCompleter;

    #[async_trait]
    impl Completer for EchoCompleter {
        async fn complete(&self, prompt: &str) -> Result<String> {
            // Surface the folded content so tests can assert on it
            Ok(format!("summary of: {}", &prompt[prompt.len().saturating_sub(200)..]))
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    fn window(size: usize) -> ConversationWindow {
        let summarizer = Summarizer::new(Arc::new(EchoCompleter), 1000);
        ConversationWindow::new(
            summarizer,
            WindowConfig {
                size,
                ..Default::default()
            },
        )
    }

    fn msg(session: &str, content: &str) -> Message {
        Message::new(session, Role::User, content, Utc::now(), None)
    }

    #[tokio::test]
    async fn test_empty_context() {
        let w = window(4);
        let ctx = w.context("unknown").await;
        assert!(ctx.recent_messages.is_empty());
        assert!(ctx.summary.is_empty());
    }

    #[tokio::test]
    async fn test_window_bound_and_summary() {
        let w = window(2);
        w.append(msg("s1", "turn one about apples")).await;
        w.append(msg("s1", "turn two")).await;
        w.append(msg("s1", "turn three")).await;

        let ctx = w.context("s1").await;
        assert_eq!(ctx.recent_messages.len(), 2);
        assert_eq!(ctx.recent_messages[0].content, "turn two");
        assert_eq!(ctx.recent_messages[1].content, "turn three");
        assert!(ctx.summary.contains("apples"));
    }

    #[tokio::test]
    async fn test_clear() {
        let w = window(4);
        w.append(msg("s1", "hello")).await;
        assert_eq!(w.session_count(), 1);
        w.clear("s1");
        assert_eq!(w.session_count(), 0);
        assert!(w.context("s1").await.recent_messages.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_sessions() {
        let summarizer = Summarizer::new(Arc::new(EchoCompleter), 1000);
        let w = ConversationWindow::new(
            summarizer,
            WindowConfig {
                size: 4,
                max_age_hours: 0, // everything is instantly stale
                ..Default::default()
            },
        );
        w.append(msg("s1", "hello")).await;
        // max_age_hours=0 makes the cutoff "now"; the entry is already older
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(w.sweep(), 1);
        assert_eq!(w.session_count(), 0);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let w = window(2);
        w.append(msg("s1", "one")).await;
        w.append(msg("s2", "other")).await;

        assert_eq!(w.context("s1").await.recent_messages.len(), 1);
        assert_eq!(w.context("s2").await.recent_messages.len(), 1);
    }
}
