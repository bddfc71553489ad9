//! Contact record and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    /// First seen, nothing exchanged yet.
    New,
    /// We reached out and the contact has not replied.
    NoResponse,
    /// The contact replied but has not shared contact details.
    NoContact,
    /// Contact details obtained.
    Converted,
}

impl ContactStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: ContactStatus) -> bool {
        use ContactStatus::*;

        matches!(
            (self, target),
            // From New (NoContact when the first inbound message lacks details)
            (New, NoResponse) | (New, NoContact) | (New, Converted) |
            // From NoResponse
            (NoResponse, NoContact) | (NoResponse, Converted) |
            // From NoContact
            (NoContact, Converted)
        )
    }

    /// Converted contacts never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converted)
    }
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::NoResponse => "no_response",
            Self::NoContact => "no_contact",
            Self::Converted => "converted",
        };
        write!(f, "{s}")
    }
}

/// Direction of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    Inbound,
    Outbound,
}

/// One line of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn inbound(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role: HistoryRole::Inbound,
            text: text.into(),
            at,
        }
    }

    pub fn outbound(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role: HistoryRole::Outbound,
            text: text.into(),
            at,
        }
    }
}

/// Durable per-contact state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub status: ContactStatus,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub follow_up_count: u32,
    pub first_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub last_inbound_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_follow_up_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_lead_tool_sent_at: Option<DateTime<Utc>>,
    /// Oldest first; capped by the store.
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
}

impl Contact {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: ContactStatus::New,
            display_name: None,
            follow_up_count: 0,
            first_seen_at: now,
            last_inbound_at: None,
            last_follow_up_at: None,
            last_lead_tool_sent_at: None,
            conversation_history: Vec::new(),
        }
    }

    /// Move to `target` if the state machine allows it. Returns whether it moved.
    pub fn transition_to(&mut self, target: ContactStatus) -> bool {
        if self.status.can_transition_to(target) {
            self.status = target;
            true
        } else {
            false
        }
    }

    /// Append to history, dropping the oldest entries beyond `cap`.
    pub fn push_history(&mut self, entry: HistoryEntry, cap: usize) {
        self.conversation_history.push(entry);
        if self.conversation_history.len() > cap {
            let excess = self.conversation_history.len() - cap;
            self.conversation_history.drain(..excess);
        }
    }

    /// The most recent `n` history entries, oldest first.
    pub fn recent_history(&self, n: usize) -> &[HistoryEntry] {
        let start = self.conversation_history.len().saturating_sub(n);
        &self.conversation_history[start..]
    }

    /// Anchor for follow-up eligibility: the last follow-up, else first sight.
    pub fn last_touch(&self) -> DateTime<Utc> {
        self.last_follow_up_at.unwrap_or(self.first_seen_at)
    }
}
