//! Budgeted prompt assembly
//!
//! Builds the final LLM prompt from the system instruction, the running
//! summary, merged context groups, the recent window, and the current user
//! turn, under a hard character budget. Inclusion priority when the budget
//! is tight: the user turn must fit, then recent messages (most recent
//! first), then the summary (truncated at a sentence boundary), then
//! retrieved context groups (trailing groups dropped).

use chrono::SecondsFormat;

use crate::config::{PromptConfig, PromptFormat};
use crate::error::{Result, TimelineError};
use crate::summary::truncate_at_sentence;
use crate::types::{ContextGroup, Message};

/// Default system instruction for the chat pipeline
pub const SYSTEM_INSTRUCTION: &str =
    "You are a helpful assistant. Use the provided context only if relevant.";

/// An assembled prompt plus what made it in
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub text: String,
    /// How many of the window's recent messages were included
    pub included_recent: usize,
    /// How many context groups were included
    pub included_groups: usize,
    pub summary_included: bool,
}

/// Prompt builder parameterized by format and budget
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    config: PromptConfig,
}

impl PromptBuilder {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    /// Assemble a prompt under the budget.
    ///
    /// Fails with `PROMPT_OVERFLOW` when even the user turn alone cannot
    /// fit; every successful result satisfies `len <= max_length` and
    /// contains the user turn verbatim.
    pub fn build(
        &self,
        system: &str,
        summary: &str,
        recent: &[Message],
        groups: &[ContextGroup],
        user_turn: &str,
    ) -> Result<BuiltPrompt> {
        let max = self.config.max_length;

        let bare = self.render(system, None, &[], &[], user_turn);
        if bare.chars().count() > max {
            return Err(TimelineError::PromptOverflow {
                needed: bare.chars().count(),
                max,
            });
        }

        // Recent messages: keep the largest suffix that fits, newest bias
        let mut included_recent = recent.len();
        let mut text = self.render(system, None, &[], &recent[recent.len() - included_recent..], user_turn);
        while text.chars().count() > max && included_recent > 0 {
            included_recent -= 1;
            text = self.render(
                system,
                None,
                &[],
                &recent[recent.len() - included_recent..],
                user_turn,
            );
        }
        let recent_slice = &recent[recent.len() - included_recent..];

        // Summary: include whole, or truncated at a sentence boundary
        let mut summary_part: Option<String> = None;
        if !summary.is_empty() {
            let with_empty = self.render(system, Some(""), &[], recent_slice, user_turn);
            let allowed = max.saturating_sub(with_empty.chars().count());
            let truncated = truncate_at_sentence(summary, allowed);
            if !truncated.is_empty() {
                summary_part = Some(truncated);
            }
        }
        let summary_ref = summary_part.as_deref();

        // Context groups: oldest first, drop trailing groups on overflow
        let mut included_groups = 0;
        let mut best = self.render(system, summary_ref, &[], recent_slice, user_turn);
        for n in 1..=groups.len() {
            let candidate = self.render(system, summary_ref, &groups[..n], recent_slice, user_turn);
            if candidate.chars().count() > max {
                break;
            }
            included_groups = n;
            best = candidate;
        }

        Ok(BuiltPrompt {
            text: best,
            included_recent,
            included_groups,
            summary_included: summary_part.is_some(),
        })
    }

    fn render(
        &self,
        system: &str,
        summary: Option<&str>,
        groups: &[ContextGroup],
        recent: &[Message],
        user_turn: &str,
    ) -> String {
        match self.config.format {
            PromptFormat::Structured => {
                self.render_structured(system, summary, groups, recent, user_turn)
            }
            PromptFormat::Plain => self.render_plain(system, summary, groups, recent, user_turn),
        }
    }

    fn render_structured(
        &self,
        system: &str,
        summary: Option<&str>,
        groups: &[ContextGroup],
        recent: &[Message],
        user_turn: &str,
    ) -> String {
        let mut out = String::new();
        out.push_str("<system>\n");
        out.push_str(system);
        out.push_str("\n</system>\n");

        if let Some(summary) = summary {
            out.push_str("<system>\nSummary of earlier conversation:\n");
            out.push_str(summary);
            out.push_str("\n</system>\n");
        }

        out.push_str("<system>\nRetrieved context:\n");
        out.push_str(&render_groups(groups));
        out.push_str("</system>\n");

        if !recent.is_empty() {
            out.push_str("<recent>\n");
            out.push_str(&render_recent(recent));
            out.push_str("</recent>\n");
        }

        out.push_str("<user>");
        out.push_str(user_turn);
        out.push_str("</user>");
        out
    }

    fn render_plain(
        &self,
        system: &str,
        summary: Option<&str>,
        groups: &[ContextGroup],
        recent: &[Message],
        user_turn: &str,
    ) -> String {
        let mut out = String::new();
        out.push_str("System:\n");
        out.push_str(system);
        out.push_str("\n\n");

        if let Some(summary) = summary {
            out.push_str("Summary of earlier conversation:\n");
            out.push_str(summary);
            out.push_str("\n\n");
        }

        out.push_str("Retrieved context:\n");
        out.push_str(&render_groups(groups));
        out.push('\n');

        if !recent.is_empty() {
            out.push_str("Recent messages:\n");
            out.push_str(&render_recent(recent));
            out.push('\n');
        }

        out.push_str("User:\n");
        out.push_str(user_turn);
        out
    }
}

fn render_groups(groups: &[ContextGroup]) -> String {
    let mut out = String::new();
    for (i, group) in groups.iter().enumerate() {
        out.push_str(&format!(
            "[group {}, t={}] {}\n",
            i + 1,
            group
                .earliest_timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            group.combined_text()
        ));
    }
    out
}

fn render_recent(recent: &[Message]) -> String {
    let mut out = String::new();
    for message in recent {
        out.push_str(&format!("{}: {}\n", message.role, message.content));
    }
    out
}
