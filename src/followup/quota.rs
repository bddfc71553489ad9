//! Daily follow-up quotas (global and per contact).
//!
//! Counters belong to one local calendar day and reset when the date
//! changes. State is loaded lazily from the KV store on first use and
//! written back after every recorded send.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::WorkingHours;
use crate::error::StoreError;
use crate::store::{KvStore, get_json, set_json};

pub const QUOTA_KEY: &str = "followup:quota";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct QuotaState {
    date: Option<NaiveDate>,
    global: u32,
    per_contact: HashMap<String, u32>,
}

impl QuotaState {
    fn roll(&mut self, today: NaiveDate) {
        if self.date != Some(today) {
            if self.date.is_some() {
                debug!(date = %today, "Follow-up quota reset for new day");
            }
            *self = QuotaState {
                date: Some(today),
                ..Default::default()
            };
        }
    }
}

/// Result of an authoritative quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allowance {
    Allowed,
    GlobalExhausted,
    ContactExhausted,
}

pub struct QuotaTracker {
    kv: Arc<dyn KvStore>,
    daily: u32,
    per_contact: u32,
    hours: WorkingHours,
    state: Mutex<Option<QuotaState>>,
}

impl QuotaTracker {
    /// `hours` only supplies the UTC offset that defines a "day".
    pub fn new(kv: Arc<dyn KvStore>, daily: u32, per_contact: u32, hours: WorkingHours) -> Self {
        Self {
            kv,
            daily,
            per_contact,
            hours,
            state: Mutex::new(None),
        }
    }

    /// Sends left today across all contacts.
    pub async fn global_remaining(&self, now: DateTime<Utc>) -> Result<u32, StoreError> {
        let mut guard = self.state.lock().await;
        let state = self.current(&mut guard, now).await?;
        Ok(self.daily.saturating_sub(state.global))
    }

    /// Whether one more send to `contact_id` fits in today's quotas.
    pub async fn check(&self, contact_id: &str, now: DateTime<Utc>) -> Result<Allowance, StoreError> {
        let mut guard = self.state.lock().await;
        let state = self.current(&mut guard, now).await?;
        if state.global >= self.daily {
            return Ok(Allowance::GlobalExhausted);
        }
        let sent = state.per_contact.get(contact_id).copied().unwrap_or(0);
        if sent >= self.per_contact {
            return Ok(Allowance::ContactExhausted);
        }
        Ok(Allowance::Allowed)
    }

    /// Count a confirmed send and persist the counters.
    pub async fn record(&self, contact_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let state = self.current(&mut guard, now).await?;
        state.global += 1;
        *state.per_contact.entry(contact_id.to_string()).or_insert(0) += 1;
        set_json(self.kv.as_ref(), QUOTA_KEY, &*state).await
    }

    /// Load on first use, then roll to today's date.
    async fn current<'a>(
        &self,
        slot: &'a mut Option<QuotaState>,
        now: DateTime<Utc>,
    ) -> Result<&'a mut QuotaState, StoreError> {
        if slot.is_none() {
            let stored: Option<QuotaState> = get_json(self.kv.as_ref(), QUOTA_KEY).await?;
            *slot = Some(stored.unwrap_or_default());
        }
        let state = slot.get_or_insert_with(QuotaState::default);
        state.roll(self.hours.local_date(now));
        Ok(state)
    }
}
