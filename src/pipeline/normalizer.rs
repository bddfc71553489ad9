//! Event normalizer: raw source observations → canonical [`Message`]s.
//!
//! The page re-renders the same chat element many times, so every raw event
//! is reduced to a fingerprint and checked against a bounded ring of recently
//! seen fingerprints. The ring evicts oldest-first and can be persisted so a
//! restart does not answer the same message twice.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::channels::RawEvent;
use crate::clock::Clock;
use crate::config::DedupConfig;
use crate::error::StoreError;
use crate::pipeline::types::{Message, MessageType};
use crate::store::{KvStore, get_json, set_json};

/// KV key holding the persisted fingerprint ring (oldest first).
pub const FINGERPRINTS_KEY: &str = "dedup:fingerprints";

/// Why an event did not become a new message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingContact,
    EmptyContent,
    Stale,
    Duplicate,
}

#[derive(Debug, Default)]
struct RecentFingerprints {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl RecentFingerprints {
    /// Insert; returns false when already present.
    fn insert(&mut self, fingerprint: String, capacity: usize) -> bool {
        if self.members.contains(&fingerprint) {
            return false;
        }
        self.members.insert(fingerprint.clone());
        self.order.push_back(fingerprint);
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }
}

#[derive(Debug, Default)]
struct NormalizerState {
    recent: RecentFingerprints,
    /// Contact the page switched to, and when.
    active_contact: Option<(String, DateTime<Utc>)>,
}

/// Converts raw events into deduplicated messages.
pub struct Normalizer {
    config: DedupConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<NormalizerState>,
}

impl Normalizer {
    pub fn new(config: DedupConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(NormalizerState::default()),
        }
    }

    /// Normalize a raw event. `None` for unusable, stale, or already-seen events.
    pub fn normalize(&self, raw: &RawEvent) -> Option<Message> {
        match self.try_normalize(raw) {
            Ok(message) => Some(message),
            Err(reason) => {
                debug!(
                    contact_id = raw.contact_id.as_deref().unwrap_or("-"),
                    element_id = raw.element_id.as_deref().unwrap_or("-"),
                    reason = ?reason,
                    "Raw event dropped"
                );
                None
            }
        }
    }

    /// Same as [`normalize`](Self::normalize) but reports why an event was dropped.
    pub fn try_normalize(&self, raw: &RawEvent) -> Result<Message, Rejection> {
        let contact_id = non_empty(raw.contact_id.as_deref()).ok_or(Rejection::MissingContact)?;
        let content = non_empty(raw.content.as_deref()).unwrap_or_default();
        let title = non_empty(raw.title.as_deref());
        let source_info = non_empty(raw.source_info.as_deref());
        let kind = detect_type(raw.kind, title.as_deref(), source_info.as_deref());

        let has_body = !content.is_empty()
            || (kind == MessageType::Card && title.is_some())
            || (kind == MessageType::Spotlight && source_info.is_some());
        if !has_body {
            return Err(Rejection::EmptyContent);
        }

        let now = self.clock.now();
        let timestamp = raw.timestamp.unwrap_or(now);
        let fingerprint = fingerprint(
            &contact_id,
            raw.element_id.as_deref(),
            raw.timestamp_text.as_deref(),
            kind,
            &content,
            title.as_deref(),
            source_info.as_deref(),
        );

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if self.is_stale(timestamp, now) && !self.in_grace(&state, &contact_id, now) {
            return Err(Rejection::Stale);
        }

        if !state.recent.insert(fingerprint.clone(), self.config.capacity) {
            return Err(Rejection::Duplicate);
        }
        drop(state);

        Ok(Message {
            id: fingerprint,
            contact_id,
            message_type: kind,
            content,
            title,
            source_info,
            timestamp,
            is_system_message: raw.is_system,
            contact_name: non_empty(raw.contact_name.as_deref()),
        })
    }

    /// Record that the page switched its active conversation.
    pub fn set_active_contact(&self, contact_id: &str) {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.active_contact = Some((contact_id.to_string(), now));
        debug!(contact_id = contact_id, "Active contact switched");
    }

    /// Number of fingerprints currently remembered.
    pub fn seen_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recent
            .order
            .len()
    }

    /// Whether a fingerprint is in the ring.
    pub fn has_seen(&self, fingerprint: &str) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recent
            .members
            .contains(fingerprint)
    }

    /// Save the fingerprint ring.
    pub async fn persist(&self, store: &dyn KvStore) -> Result<(), StoreError> {
        let snapshot: Vec<String> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.recent.order.iter().cloned().collect()
        };
        set_json(store, FINGERPRINTS_KEY, &snapshot).await
    }

    /// Load a previously persisted ring, keeping the newest `capacity` entries.
    /// Returns the number of fingerprints restored.
    pub async fn restore(&self, store: &dyn KvStore) -> Result<usize, StoreError> {
        let saved: Vec<String> = get_json(store, FINGERPRINTS_KEY)
            .await?
            .unwrap_or_default();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for fingerprint in saved {
            state.recent.insert(fingerprint, self.config.capacity);
        }
        Ok(state.recent.order.len())
    }

    fn is_stale(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(timestamp);
        chrono::Duration::from_std(self.config.stale_after)
            .map(|limit| age > limit)
            .unwrap_or(false)
    }

    fn in_grace(&self, state: &NormalizerState, contact_id: &str, now: DateTime<Utc>) -> bool {
        let Some((active, switched_at)) = &state.active_contact else {
            return false;
        };
        if active != contact_id {
            return false;
        }
        chrono::Duration::from_std(self.config.grace_window)
            .map(|window| now.signed_duration_since(*switched_at) <= window)
            .unwrap_or(false)
    }
}

/// Explicit hint wins; otherwise a title means a card and source info a spotlight entry.
fn detect_type(
    hint: Option<MessageType>,
    title: Option<&str>,
    source_info: Option<&str>,
) -> MessageType {
    if let Some(kind) = hint {
        return kind;
    }
    if title.is_some() {
        MessageType::Card
    } else if source_info.is_some() {
        MessageType::Spotlight
    } else {
        MessageType::Text
    }
}

/// Stable fingerprint over every distinguishing feature of an observation.
///
/// Without an element id the body itself becomes part of the identity.
pub fn fingerprint(
    contact_id: &str,
    element_id: Option<&str>,
    timestamp_text: Option<&str>,
    kind: MessageType,
    content: &str,
    title: Option<&str>,
    source_info: Option<&str>,
) -> String {
    let mut parts: Vec<&str> = vec![
        contact_id,
        element_id.unwrap_or(""),
        timestamp_text.map(str::trim).unwrap_or(""),
        kind.tag(),
    ];
    if element_id.is_none() {
        parts.push(content);
        parts.push(title.unwrap_or(""));
        parts.push(source_info.unwrap_or(""));
    }
    format!("{}-{:016x}", kind.tag(), xxh3_64(parts.join("\u{1f}").as_bytes()))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
