//! Shared types for the message processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Message kinds ───────────────────────────────────────────────────

/// What the inbound chat element renders as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain text bubble.
    Text,
    /// Rich card (product, service, form); its title carries the meaning.
    Card,
    /// Spotlight / promoted entry; its source info carries the meaning.
    Spotlight,
}

impl MessageType {
    /// Short tag used in fingerprints and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Card => "card",
            Self::Spotlight => "spotlight",
        }
    }

    /// All kinds, in declaration order.
    pub fn all() -> Vec<MessageType> {
        vec![Self::Text, Self::Card, Self::Spotlight]
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

// ── Canonical message ───────────────────────────────────────────────

/// Canonical inbound message produced by the normalizer.
///
/// Immutable once built. `id` is the dedup fingerprint, so two renders of
/// the same chat element produce equal ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub contact_id: String,
    pub message_type: MessageType,
    pub content: String,
    pub title: Option<String>,
    pub source_info: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_system_message: bool,
    /// Display name reported by the source, if any.
    pub contact_name: Option<String>,
}

impl Message {
    /// Text the rules engine matches against.
    ///
    /// Cards match on their title and spotlight entries on their source
    /// info; both fall back to the content when that field is absent.
    pub fn matchable_text(&self) -> &str {
        let preferred = match self.message_type {
            MessageType::Text => None,
            MessageType::Card => self.title.as_deref(),
            MessageType::Spotlight => self.source_info.as_deref(),
        };
        preferred
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.content)
    }
}
