//! Delivery job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a job pushes into the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DeliveryPayload {
    /// Plain text reply.
    Text(String),
    /// Pre-configured lead tool reference.
    Tool(String),
}

impl DeliveryPayload {
    /// Text recorded in conversation history for this payload.
    pub fn history_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Tool(tool_ref) => format!("[lead tool: {tool_ref}]"),
        }
    }
}

/// A unit of outbound work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub id: Uuid,
    pub contact_id: String,
    pub payload: DeliveryPayload,
    pub enqueued_at: DateTime<Utc>,
    /// Attempts made so far.
    pub attempt: u32,
}

impl DeliveryJob {
    pub fn new(contact_id: impl Into<String>, payload: DeliveryPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            contact_id: contact_id.into(),
            payload,
            enqueued_at: now,
            attempt: 0,
        }
    }
}

/// Queue counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Jobs confirmed by the sender.
    pub sent: u64,
    /// Jobs that gave up (retries exhausted or internal fault).
    pub failed: u64,
    /// Failed attempts that were put back for another try.
    pub retried: u64,
}
