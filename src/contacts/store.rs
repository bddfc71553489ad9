//! Durable contact state over the [`KvStore`].
//!
//! Layout: one JSON record per contact under `contact:{id}`, the set of known
//! ids under `contacts:index`, and the blacklist under `contacts:blacklist`.
//! Every mutation runs under one async mutex so read-modify-write sequences
//! (counter bumps, status moves) are atomic relative to other tasks.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::contacts::model::{Contact, ContactStatus, HistoryEntry};
use crate::error::StoreError;
use crate::pipeline::types::Message;
use crate::store::{KvStore, get_json, set_json};

const INDEX_KEY: &str = "contacts:index";
const BLACKLIST_KEY: &str = "contacts:blacklist";

fn contact_key(id: &str) -> String {
    format!("contact:{id}")
}

/// Contact records, status transitions and the blacklist.
pub struct ContactStore {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    max_history: usize,
    write_lock: Mutex<()>,
}

impl ContactStore {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, max_history: usize) -> Self {
        Self {
            kv,
            clock,
            max_history: max_history.max(1),
            write_lock: Mutex::new(()),
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub async fn get(&self, id: &str) -> Result<Option<Contact>, StoreError> {
        get_json(self.kv.as_ref(), &contact_key(id)).await
    }

    /// All known contacts. Index entries whose record vanished are skipped.
    pub async fn list(&self) -> Result<Vec<Contact>, StoreError> {
        let index = self.load_index().await?;
        let mut contacts = Vec::with_capacity(index.len());
        for id in &index {
            if let Some(contact) = self.get(id).await? {
                contacts.push(contact);
            }
        }
        Ok(contacts)
    }

    pub async fn list_by_status(
        &self,
        statuses: &[ContactStatus],
    ) -> Result<Vec<Contact>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|c| statuses.contains(&c.status))
            .collect())
    }

    // ── Creation / removal ──────────────────────────────────────────

    pub async fn get_or_create(&self, id: &str) -> Result<Contact, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.load_or_create(id).await
    }

    /// Remove the record and its index entry. Missing ids are not an error.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.load_index().await?;
        if index.remove(id) {
            set_json(self.kv.as_ref(), INDEX_KEY, &index).await?;
        }
        self.kv.delete(&contact_key(id)).await?;
        info!(contact_id = %id, "Contact deleted");
        Ok(())
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Record an inbound message, creating the contact on first sight.
    ///
    /// New and NoResponse contacts move to Converted when `disclosed`, else
    /// to NoContact. Other statuses are left alone.
    pub async fn record_inbound(
        &self,
        id: &str,
        message: &Message,
        disclosed: bool,
    ) -> Result<Contact, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut contact = self.load_or_create(id).await?;
        let now = self.clock.now();

        if contact.display_name.is_none() {
            contact.display_name = message.contact_name.clone();
        }
        contact.last_inbound_at = Some(now);
        contact.push_history(
            HistoryEntry::inbound(message.matchable_text(), now),
            self.max_history,
        );

        if matches!(contact.status, ContactStatus::New | ContactStatus::NoResponse) {
            let from = contact.status;
            let target = if disclosed {
                ContactStatus::Converted
            } else {
                ContactStatus::NoContact
            };
            if contact.transition_to(target) {
                info!(contact_id = %id, from = %from, to = %target, "Contact status changed");
            }
        }

        self.save(&contact).await?;
        Ok(contact)
    }

    /// Record an opener we sent to a contact who has not written yet.
    ///
    /// Creates the contact on first sight and moves New to NoResponse. Any
    /// other status only gets the history entry.
    pub async fn record_opener(&self, id: &str, text: &str) -> Result<Contact, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut contact = self.load_or_create(id).await?;
        let now = self.clock.now();

        contact.push_history(HistoryEntry::outbound(text, now), self.max_history);
        if contact.status == ContactStatus::New
            && contact.transition_to(ContactStatus::NoResponse)
        {
            info!(contact_id = %id, "Opener sent, awaiting response");
        }

        self.save(&contact).await?;
        Ok(contact)
    }

    /// New → NoResponse, after an outbound opener went unanswered.
    pub async fn mark_no_response(&self, id: &str) -> Result<Contact, StoreError> {
        self.move_to(id, ContactStatus::NoResponse).await
    }

    pub async fn mark_converted(&self, id: &str) -> Result<Contact, StoreError> {
        self.move_to(id, ContactStatus::Converted).await
    }

    pub async fn record_outbound(&self, id: &str, text: &str) -> Result<Contact, StoreError> {
        let now = self.clock.now();
        let cap = self.max_history;
        self.update(id, |c| c.push_history(HistoryEntry::outbound(text, now), cap))
            .await
    }

    /// Bump the follow-up counter and stamp the time. Returns the new count.
    pub async fn record_follow_up(&self, id: &str, now: DateTime<Utc>) -> Result<u32, StoreError> {
        let contact = self
            .update(id, |c| {
                c.follow_up_count += 1;
                c.last_follow_up_at = Some(now);
            })
            .await?;
        Ok(contact.follow_up_count)
    }

    pub async fn record_lead_tool(&self, id: &str, now: DateTime<Utc>) -> Result<Contact, StoreError> {
        self.update(id, |c| c.last_lead_tool_sent_at = Some(now)).await
    }

    // ── Blacklist ───────────────────────────────────────────────────

    pub async fn blacklist(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.load_blacklist().await?;
        if list.insert(id.to_string()) {
            set_json(self.kv.as_ref(), BLACKLIST_KEY, &list).await?;
            info!(contact_id = %id, "Contact blacklisted");
        }
        Ok(())
    }

    pub async fn unblacklist(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.load_blacklist().await?;
        if list.remove(id) {
            set_json(self.kv.as_ref(), BLACKLIST_KEY, &list).await?;
            info!(contact_id = %id, "Contact removed from blacklist");
        }
        Ok(())
    }

    pub async fn is_blacklisted(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.load_blacklist().await?.contains(id))
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn move_to(&self, id: &str, target: ContactStatus) -> Result<Contact, StoreError> {
        self.update(id, |c| {
            let from = c.status;
            if c.transition_to(target) {
                info!(contact_id = %c.id, from = %from, to = %target, "Contact status changed");
            } else if from != target {
                debug!(contact_id = %c.id, from = %from, to = %target, "Status change not allowed");
            }
        })
        .await
    }

    /// Load an existing contact, apply `f`, save. Unknown ids are an error.
    async fn update<F>(&self, id: &str, f: F) -> Result<Contact, StoreError>
    where
        F: FnOnce(&mut Contact),
    {
        let _guard = self.write_lock.lock().await;
        let mut contact = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::ContactNotFound(id.to_string()))?;
        f(&mut contact);
        self.save(&contact).await?;
        Ok(contact)
    }

    /// Caller must hold the write lock.
    async fn load_or_create(&self, id: &str) -> Result<Contact, StoreError> {
        if let Some(contact) = self.get(id).await? {
            return Ok(contact);
        }
        let contact = Contact::new(id, self.clock.now());
        self.save(&contact).await?;

        let mut index = self.load_index().await?;
        if index.insert(id.to_string()) {
            set_json(self.kv.as_ref(), INDEX_KEY, &index).await?;
        }
        info!(contact_id = %id, "New contact");
        Ok(contact)
    }

    async fn save(&self, contact: &Contact) -> Result<(), StoreError> {
        set_json(self.kv.as_ref(), &contact_key(&contact.id), contact).await
    }

    async fn load_index(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(get_json(self.kv.as_ref(), INDEX_KEY).await?.unwrap_or_default())
    }

    async fn load_blacklist(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(get_json(self.kv.as_ref(), BLACKLIST_KEY)
            .await?
            .unwrap_or_default())
    }
}
