//! Text generation for AI replies.
//!
//! The concrete backend is a collaborator: anything implementing
//! [`TextGenerator`] can produce replies. The crate ships a generator that
//! always fails (`NullGenerator`, for runs without a backend) and one that
//! returns a fixed reply (`StaticGenerator`).

use async_trait::async_trait;

use crate::contacts::{HistoryEntry, HistoryRole};
use crate::error::LlmError;
use crate::pipeline::types::Message;

/// Max characters of the inbound message placed in a prompt.
const MAX_MESSAGE_CHARS: usize = 1000;

/// Max characters per history line placed in a prompt.
const MAX_HISTORY_CHARS: usize = 200;

/// Produces a reply from a prompt and recent conversation history.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Backend name for logs and errors.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, history: &[HistoryEntry]) -> Result<String, LlmError>;
}

/// Generator used when no backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGenerator;

#[async_trait]
impl TextGenerator for NullGenerator {
    fn name(&self) -> &str {
        "none"
    }

    async fn generate(&self, _prompt: &str, _history: &[HistoryEntry]) -> Result<String, LlmError> {
        Err(LlmError::NotConfigured)
    }
}

/// Always answers with the same text.
#[derive(Debug, Clone)]
pub struct StaticGenerator {
    reply: String,
}

impl StaticGenerator {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for StaticGenerator {
    fn name(&self) -> &str {
        "static"
    }

    async fn generate(&self, _prompt: &str, _history: &[HistoryEntry]) -> Result<String, LlmError> {
        Ok(self.reply.clone())
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the reply prompt for an inbound message.
pub fn build_reply_prompt(system_prompt: &str, message: &Message, history: &[HistoryEntry]) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(system_prompt.trim());
    prompt.push_str("\n\n");

    if let Some(ref name) = message.contact_name {
        prompt.push_str(&format!("Customer: {name}\n"));
    }
    prompt.push_str(&format!("Message kind: {}\n", message.message_type));

    if !history.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for entry in history {
            let who = match entry.role {
                HistoryRole::Inbound => "Customer",
                HistoryRole::Outbound => "You",
            };
            let preview: String = entry.text.chars().take(MAX_HISTORY_CHARS).collect();
            prompt.push_str(&format!("  {who}: {preview}\n"));
        }
    }

    let content: String = message
        .matchable_text()
        .chars()
        .take(MAX_MESSAGE_CHARS)
        .collect();
    prompt.push_str(&format!("\nReply to:\n{content}"));
    prompt
}

/// Trim a generated reply; an empty result is an error.
pub fn clean_reply(generator: &str, raw: &str) -> Result<String, LlmError> {
    let reply = raw.trim().trim_matches('"').trim();
    if reply.is_empty() {
        return Err(LlmError::EmptyResponse {
            provider: generator.to_string(),
        });
    }
    Ok(reply.to_string())
}
