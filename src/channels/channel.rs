//! Collaborator traits at the edge of the orchestrator.
//!
//! The page-specific layer (scraping, click simulation) lives behind these:
//! a [`MessageSource`] produces raw observations, a [`SenderChannel`] pushes
//! text or lead tools into the single active conversation, and a
//! [`ContactInfoProbe`] answers whether a contact has disclosed contact
//! details.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::pipeline::types::MessageType;

/// A raw, un-deduplicated observation of a chat element.
///
/// Every field is optional because the source scrapes whatever the page
/// happens to render; the normalizer decides what is usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    /// Stable element identity from the page, when one exists.
    pub element_id: Option<String>,
    pub contact_id: Option<String>,
    pub contact_name: Option<String>,
    pub content: Option<String>,
    pub title: Option<String>,
    pub source_info: Option<String>,
    /// Timestamp text exactly as rendered ("10:42", "Yesterday").
    pub timestamp_text: Option<String>,
    /// Parsed timestamp, when the source could resolve one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Explicit kind hint from the source.
    pub kind: Option<MessageType>,
    pub is_system: bool,
}

/// Everything a source can report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceEvent {
    /// A message element was observed (possibly again).
    Message(RawEvent),
    /// The page switched its active conversation.
    ContactOpened { contact_id: String },
    /// We sent an opener to a contact who has not written to us yet.
    OpenerSent { contact_id: String, text: String },
}

/// Stream of source events.
pub type EventStream = Pin<Box<dyn Stream<Item = SourceEvent> + Send>>;

/// Produces raw message observations. Duplicates are expected.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Start observing and return the event stream.
    async fn start(&self) -> Result<EventStream, ChannelError>;
}

/// The single outbound send channel.
///
/// Implementations verify delivery themselves (with their own timeout) and
/// return an error when the send could not be confirmed.
#[async_trait]
pub trait SenderChannel: Send + Sync {
    async fn send_text(&self, contact_id: &str, text: &str) -> Result<(), ChannelError>;

    async fn send_tool(&self, contact_id: &str, tool_ref: &str) -> Result<(), ChannelError>;
}

/// Opaque "has this contact disclosed contact details" predicate.
#[async_trait]
pub trait ContactInfoProbe: Send + Sync {
    async fn has_disclosed_contact_info(&self, contact_id: &str) -> bool;
}

/// Probe backed by a set of contact ids the source has seen tagged.
#[derive(Debug, Default)]
pub struct TaggedContacts {
    tagged: RwLock<HashSet<String>>,
}

impl TaggedContacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the page shows the contact-info tag for this contact.
    pub fn tag(&self, contact_id: &str) {
        self.tagged
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(contact_id.to_string());
    }

    pub fn is_tagged(&self, contact_id: &str) -> bool {
        self.tagged
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(contact_id)
    }
}

#[async_trait]
impl ContactInfoProbe for TaggedContacts {
    async fn has_disclosed_contact_info(&self, contact_id: &str) -> bool {
        self.is_tagged(contact_id)
    }
}
