//! Running-summary folding
//!
//! Messages aged out of the conversation window are folded into a bounded
//! textual summary via the LLM. Folded input is never dropped silently: if
//! the LLM is unavailable the summarizer degrades to concatenating the
//! previous summary with the first sentence of each folded message.

use std::sync::Arc;

use crate::llm::Completer;
use crate::types::Message;

const FOLD_INSTRUCTION: &str = "Produce a concise, factual running summary of the conversation \
preserving: user identity and preferences; established facts; open questions; recent decisions.";

/// Folds aged messages into a running summary
pub struct Summarizer {
    completer: Arc<dyn Completer>,
    max_chars: usize,
}

impl Summarizer {
    pub fn new(completer: Arc<dyn Completer>, max_chars: usize) -> Self {
        Self {
            completer,
            max_chars,
        }
    }

    /// Fold messages into the previous summary, bounded by `max_chars`
    pub async fn fold(&self, previous_summary: &str, messages: &[Message]) -> String {
        if messages.is_empty() {
            return truncate_at_sentence(previous_summary, self.max_chars);
        }

        let prompt = self.fold_prompt(previous_summary, messages);
        match self.completer.complete(&prompt).await {
            Ok(summary) => truncate_at_sentence(summary.trim(), self.max_chars),
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed, using degraded fallback");
                self.degraded_fold(previous_summary, messages)
            }
        }
    }

    fn fold_prompt(&self, previous_summary: &str, messages: &[Message]) -> String {
        let mut prompt = String::from(FOLD_INSTRUCTION);
        prompt.push_str("\n\n");
        if !previous_summary.is_empty() {
            prompt.push_str("Current summary:\n");
            prompt.push_str(previous_summary);
            prompt.push_str("\n\n");
        }
        prompt.push_str("New conversation turns to incorporate:\n");
        for message in messages {
            prompt.push_str(&format!("{}: {}\n", message.role, message.content));
        }
        prompt.push_str(&format!(
            "\nReply with the updated summary only, at most {} characters.",
            self.max_chars
        ));
        prompt
    }

    /// Fallback when the LLM is down: previous summary plus the first
    /// sentence of each folded message
    fn degraded_fold(&self, previous_summary: &str, messages: &[Message]) -> String {
        let mut summary = previous_summary.to_string();
        for message in messages {
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(first_sentence(&message.content));
        }
        truncate_at_sentence(&summary, self.max_chars)
    }
}

/// First sentence of a text, terminator included; whole text if none
pub fn first_sentence(text: &str) -> &str {
    let trimmed = text.trim();
    for (offset, c) in trimmed.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            return &trimmed[..offset + c.len_utf8()];
        }
    }
    trimmed
}

/// Truncate to at most `max_chars` characters, preferring a sentence
/// boundary; falls back to a hard character cut
pub fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(|c| matches!(c, '.' | '!' | '?')) {
        Some(pos) => {
            let boundary = pos + cut[pos..].chars().next().map(char::len_utf8).unwrap_or(1);
            cut[..boundary].to_string()
        }
        None => cut,
    }
}
