//! Follow-up scheduler: periodic nudges for quiet contacts.
//!
//! Each cycle picks NoResponse and NoContact contacts whose last touch is
//! older than their bucket's interval, and sends each one the next template
//! through the delivery queue, one contact at a time with pacing in between.
//! Cycles never overlap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{BucketConfig, FollowUpConfig};
use crate::contacts::{Contact, ContactStatus, ContactStore};
use crate::delivery::{DeliveryPayload, DeliveryQueue};
use crate::error::StoreError;
use crate::followup::quota::{Allowance, QuotaTracker};
use crate::store::KvStore;

/// Which template set a follow-up draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSet {
    NoResponse,
    NoContact,
}

impl TemplateSet {
    fn status(self) -> ContactStatus {
        match self {
            Self::NoResponse => ContactStatus::NoResponse,
            Self::NoContact => ContactStatus::NoContact,
        }
    }
}

/// One follow-up due this cycle. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUpTask {
    pub contact_id: String,
    /// 1-based number of this follow-up for the contact.
    pub attempt_number: u32,
    pub template_set: TemplateSet,
    pub text: String,
    /// Last follow-up or first sight; oldest goes first.
    pub last_touch: DateTime<Utc>,
}

/// Why a cycle did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    OutsideWorkingHours,
    QuotaExhausted,
    StoreUnavailable,
    Reentrant,
}

/// Summary of one scheduler cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub eligible: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: Option<SkipReason>,
}

impl CycleReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }
}

/// Clears the running flag when a cycle ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct FollowUpScheduler {
    config: FollowUpConfig,
    contacts: Arc<ContactStore>,
    queue: Arc<DeliveryQueue>,
    quota: QuotaTracker,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

impl FollowUpScheduler {
    pub fn new(
        config: FollowUpConfig,
        contacts: Arc<ContactStore>,
        queue: Arc<DeliveryQueue>,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let quota = QuotaTracker::new(
            kv,
            config.daily_quota,
            config.per_contact_daily_quota,
            config.working_hours.clone(),
        );
        Self {
            config,
            contacts,
            queue,
            quota,
            clock,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one scheduling cycle. Overlapping calls return immediately.
    pub async fn run_cycle(&self) -> CycleReport {
        if !self.config.enabled {
            return CycleReport::skipped(SkipReason::Disabled);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Follow-up cycle already running");
            return CycleReport::skipped(SkipReason::Reentrant);
        }
        let _guard = RunningGuard(&self.running);

        let now = self.clock.now();
        if !self.config.working_hours.contains(now) {
            debug!(now = %now, "Outside working hours, skipping follow-ups");
            return CycleReport::skipped(SkipReason::OutsideWorkingHours);
        }

        match self.quota.global_remaining(now).await {
            Ok(0) => {
                debug!("Daily follow-up quota exhausted");
                return CycleReport::skipped(SkipReason::QuotaExhausted);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Store unavailable, skipping follow-up cycle");
                return CycleReport::skipped(SkipReason::StoreUnavailable);
            }
        }

        let tasks = match self.eligible_tasks(now).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Store unavailable, skipping follow-up cycle");
                return CycleReport::skipped(SkipReason::StoreUnavailable);
            }
        };

        let mut report = CycleReport {
            eligible: tasks.len(),
            ..Default::default()
        };
        if tasks.is_empty() {
            return report;
        }
        info!(eligible = tasks.len(), "Follow-up cycle started");

        for (i, task) in tasks.iter().enumerate() {
            if i > 0 {
                self.clock.sleep(self.pacing_delay()).await;
            }

            let now = self.clock.now();
            match self.quota.check(&task.contact_id, now).await {
                Ok(Allowance::Allowed) => {}
                Ok(Allowance::ContactExhausted) => {
                    debug!(contact_id = %task.contact_id, "Per-contact quota reached");
                    continue;
                }
                Ok(Allowance::GlobalExhausted) => {
                    info!("Daily follow-up quota reached mid-cycle");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Quota check failed, ending cycle");
                    break;
                }
            }

            match self.still_due(task).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(contact_id = %task.contact_id, "Contact changed mid-cycle, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Contact reload failed, ending cycle");
                    break;
                }
            }

            if self.send_follow_up(task, now).await {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(
            eligible = report.eligible,
            sent = report.sent,
            failed = report.failed,
            "Follow-up cycle finished"
        );
        report
    }

    /// Contacts due for a follow-up at `now`, oldest first.
    pub async fn eligible_tasks(&self, now: DateTime<Utc>) -> Result<Vec<FollowUpTask>, StoreError> {
        let buckets: Vec<(TemplateSet, &BucketConfig)> = [
            (TemplateSet::NoResponse, &self.config.no_response),
            (TemplateSet::NoContact, &self.config.no_contact),
        ]
        .into_iter()
        .filter(|(_, bucket)| bucket.enabled)
        .collect();

        if buckets.is_empty() {
            return Ok(Vec::new());
        }

        let statuses: Vec<ContactStatus> = buckets.iter().map(|(set, _)| set.status()).collect();
        let contacts = self.contacts.list_by_status(&statuses).await?;

        let mut tasks = Vec::new();
        for contact in contacts {
            let Some((set, bucket)) = buckets
                .iter()
                .find(|(set, _)| set.status() == contact.status)
            else {
                continue;
            };
            let Some(text) = due_template(&contact, bucket, now) else {
                continue;
            };
            if self.contacts.is_blacklisted(&contact.id).await? {
                continue;
            }
            if self.quota.check(&contact.id, now).await? == Allowance::ContactExhausted {
                continue;
            }
            tasks.push(FollowUpTask {
                contact_id: contact.id.clone(),
                attempt_number: contact.follow_up_count + 1,
                template_set: *set,
                text,
                last_touch: contact.last_touch(),
            });
        }

        tasks.sort_by_key(|t| t.last_touch);
        Ok(tasks)
    }

    /// Whether the contact is still in the task's bucket and not blacklisted.
    async fn still_due(&self, task: &FollowUpTask) -> Result<bool, StoreError> {
        let Some(contact) = self.contacts.get(&task.contact_id).await? else {
            return Ok(false);
        };
        if contact.status != task.template_set.status() {
            return Ok(false);
        }
        Ok(!self.contacts.is_blacklisted(&task.contact_id).await?)
    }

    /// Send one follow-up (lead tool first when due). Returns true on success.
    async fn send_follow_up(&self, task: &FollowUpTask, now: DateTime<Utc>) -> bool {
        if let Some(tool_ref) = self.lead_tool_for(task.attempt_number) {
            match self
                .queue
                .enqueue(&task.contact_id, DeliveryPayload::Tool(tool_ref.to_string()))
                .await
            {
                Ok(()) => {
                    if let Err(e) = self.contacts.record_lead_tool(&task.contact_id, now).await {
                        warn!(contact_id = %task.contact_id, error = %e, "Failed to record lead tool");
                    }
                }
                Err(e) => {
                    warn!(contact_id = %task.contact_id, error = %e, "Lead tool delivery failed");
                }
            }
        }

        if let Err(e) = self
            .queue
            .enqueue(&task.contact_id, DeliveryPayload::Text(task.text.clone()))
            .await
        {
            warn!(
                contact_id = %task.contact_id,
                attempt = task.attempt_number,
                error = %e,
                "Follow-up delivery failed"
            );
            return false;
        }

        let recorded = async {
            let count = self.contacts.record_follow_up(&task.contact_id, now).await?;
            self.contacts
                .record_outbound(&task.contact_id, &task.text)
                .await?;
            self.quota.record(&task.contact_id, now).await?;
            Ok::<u32, StoreError>(count)
        }
        .await;

        match recorded {
            Ok(count) => {
                info!(
                    contact_id = %task.contact_id,
                    template_set = ?task.template_set,
                    follow_up_count = count,
                    "Follow-up sent"
                );
            }
            Err(e) => {
                warn!(contact_id = %task.contact_id, error = %e, "Follow-up sent but not recorded");
            }
        }
        true
    }

    fn lead_tool_for(&self, attempt_number: u32) -> Option<&str> {
        let every = self.config.lead_tool_every;
        if every == 0 || attempt_number % every != 0 {
            return None;
        }
        self.config.lead_tool.as_deref()
    }

    fn pacing_delay(&self) -> Duration {
        let jitter_ms = self.config.pacing_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.config.pacing + Duration::from_millis(jitter)
    }
}

/// Template text when the contact is due in this bucket, else `None`.
fn due_template(contact: &Contact, bucket: &BucketConfig, now: DateTime<Utc>) -> Option<String> {
    if contact.follow_up_count >= bucket.max_follow_ups {
        return None;
    }
    let interval = chrono::Duration::from_std(bucket.interval).ok()?;
    if now - contact.last_touch() <= interval {
        return None;
    }
    let last = bucket.templates.len().checked_sub(1)?;
    let index = (contact.follow_up_count as usize).min(last);
    bucket.templates.get(index).cloned()
}

/// Run `run_cycle` every `interval` until the returned flag is set.
pub fn spawn_follow_up_ticker(
    scheduler: Arc<FollowUpScheduler>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Follow-up ticker started");

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Follow-up ticker shutting down");
                return;
            }

            let report = scheduler.run_cycle().await;
            if let Some(reason) = report.skipped {
                debug!(reason = ?reason, "Follow-up cycle skipped");
            }
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::Notify;

    use crate::channels::channel::SenderChannel;
    use crate::clock::ManualClock;
    use crate::config::{DeliveryConfig, WorkingHours};
    use crate::error::ChannelError;
    use crate::store::MemoryKv;

    #[derive(Default)]
    struct RecordingSender {
        log: StdMutex<Vec<String>>,
        fail_all: AtomicBool,
        gate: Option<Notify>,
    }

    impl RecordingSender {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        async fn record(&self, entry: String) -> Result<(), ChannelError> {
            self.log.lock().unwrap().push(entry);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(ChannelError::Unavailable("page closed".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SenderChannel for RecordingSender {
        async fn send_text(&self, contact_id: &str, text: &str) -> Result<(), ChannelError> {
            self.record(format!("{contact_id}:{text}")).await
        }

        async fn send_tool(&self, contact_id: &str, tool_ref: &str) -> Result<(), ChannelError> {
            self.record(format!("{contact_id}:tool:{tool_ref}")).await
        }
    }

    struct Harness {
        scheduler: Arc<FollowUpScheduler>,
        contacts: Arc<ContactStore>,
        sender: Arc<RecordingSender>,
        kv: Arc<MemoryKv>,
        clock: ManualClock,
    }

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap()
    }

    fn config() -> FollowUpConfig {
        let bucket = BucketConfig {
            enabled: true,
            interval: Duration::from_secs(24 * 3600),
            max_follow_ups: 3,
            templates: vec!["t1".into(), "t2".into()],
        };
        FollowUpConfig {
            enabled: true,
            no_response: bucket.clone(),
            no_contact: BucketConfig {
                templates: vec!["nc1".into()],
                ..bucket
            },
            working_hours: WorkingHours {
                start_hour: 0,
                end_hour: 0,
                utc_offset_minutes: 0,
            },
            ..Default::default()
        }
    }

    fn harness_with(config: FollowUpConfig, sender: RecordingSender) -> Harness {
        let kv = Arc::new(MemoryKv::new());
        let clock = ManualClock::new(start_time());
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let sender = Arc::new(sender);
        let contacts = Arc::new(ContactStore::new(kv.clone(), clock_arc.clone(), 50));
        let queue = DeliveryQueue::new(DeliveryConfig::default(), sender.clone(), clock_arc.clone());
        let scheduler = Arc::new(FollowUpScheduler::new(
            config,
            contacts.clone(),
            queue,
            kv.clone(),
            clock_arc,
        ));
        Harness {
            scheduler,
            contacts,
            sender,
            kv,
            clock,
        }
    }

    fn harness(config: FollowUpConfig) -> Harness {
        harness_with(config, RecordingSender::default())
    }

    impl Harness {
        async fn no_response_contact(&self, id: &str) {
            self.contacts.get_or_create(id).await.unwrap();
            self.contacts.mark_no_response(id).await.unwrap();
        }

        fn advance_hours(&self, hours: i64) {
            self.clock.advance(chrono::Duration::hours(hours));
        }
    }

    #[tokio::test]
    async fn only_contacts_past_interval_are_eligible() {
        let h = harness(config());
        h.no_response_contact("old").await;
        h.advance_hours(24);
        h.no_response_contact("fresh").await;
        h.advance_hours(1);

        let report = h.scheduler.run_cycle().await;
        assert_eq!(report.eligible, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(h.sender.log(), vec!["old:t1"]);

        let old = h.contacts.get("old").await.unwrap().unwrap();
        assert_eq!(old.follow_up_count, 1);
        assert!(old.last_follow_up_at.is_some());
        assert_eq!(old.conversation_history.last().unwrap().text, "t1");
        let fresh = h.contacts.get("fresh").await.unwrap().unwrap();
        assert_eq!(fresh.follow_up_count, 0);
    }

    #[tokio::test]
    async fn exactly_one_interval_is_not_enough() {
        let h = harness(config());
        h.no_response_contact("c1").await;
        h.advance_hours(24);
        assert!(h.scheduler.eligible_tasks(h.clock.now()).await.unwrap().is_empty());
        h.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(h.scheduler.eligible_tasks(h.clock.now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn templates_clamp_to_last_and_stop_at_max() {
        let h = harness(config());
        h.no_response_contact("c1").await;
        for _ in 0..4 {
            h.advance_hours(25);
            h.scheduler.run_cycle().await;
        }
        assert_eq!(h.sender.log(), vec!["c1:t1", "c1:t2", "c1:t2"]);
        assert_eq!(
            h.contacts.get("c1").await.unwrap().unwrap().follow_up_count,
            3
        );
    }

    #[tokio::test]
    async fn recent_follow_up_is_not_eligible_again() {
        let h = harness(config());
        h.no_response_contact("c1").await;
        h.advance_hours(25);
        assert_eq!(h.scheduler.run_cycle().await.sent, 1);

        h.advance_hours(1);
        let contact = h.contacts.get("c1").await.unwrap().unwrap();
        assert_eq!(contact.follow_up_count, 1);
        assert_eq!(h.clock.now() - contact.last_follow_up_at.unwrap(), chrono::Duration::hours(1));
        assert!(h.scheduler.eligible_tasks(h.clock.now()).await.unwrap().is_empty());

        h.advance_hours(24);
        assert_eq!(h.scheduler.eligible_tasks(h.clock.now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn contacts_changed_mid_cycle_are_skipped() {
        let sender = RecordingSender {
            gate: Some(Notify::new()),
            ..Default::default()
        };
        let h = harness_with(config(), sender);
        h.no_response_contact("a").await;
        h.advance_hours(1);
        h.no_response_contact("b").await;
        h.no_response_contact("c").await;
        h.advance_hours(25);

        let scheduler = h.scheduler.clone();
        let cycle = tokio::spawn(async move { scheduler.run_cycle().await });
        while h.sender.log().is_empty() {
            tokio::task::yield_now().await;
        }

        // "a" is in flight; "b" converts and "c" is blacklisted meanwhile.
        h.contacts.mark_converted("b").await.unwrap();
        h.contacts.blacklist("c").await.unwrap();
        h.sender.gate.as_ref().unwrap().notify_one();

        let report = cycle.await.unwrap();
        assert_eq!(report.eligible, 3);
        assert_eq!(report.sent, 1);
        assert_eq!(h.sender.log(), vec!["a:t1"]);
        for id in ["b", "c"] {
            assert_eq!(h.contacts.get(id).await.unwrap().unwrap().follow_up_count, 0);
        }
    }

    #[tokio::test]
    async fn no_contact_bucket_uses_its_templates() {
        let h = harness(config());
        h.contacts.get_or_create("c1").await.unwrap();
        h.contacts
            .record_inbound("c1", &inbound("c1"), false)
            .await
            .unwrap();
        h.advance_hours(25);
        let tasks = h.scheduler.eligible_tasks(h.clock.now()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].template_set, TemplateSet::NoContact);
        assert_eq!(tasks[0].text, "nc1");
        assert_eq!(tasks[0].attempt_number, 1);
    }

    #[tokio::test]
    async fn disabled_bucket_and_empty_templates_are_skipped() {
        let mut cfg = config();
        cfg.no_response.enabled = false;
        cfg.no_contact.templates.clear();
        let h = harness(cfg);
        h.no_response_contact("a").await;
        h.contacts.record_inbound("b", &inbound("b"), false).await.unwrap();
        h.advance_hours(25);
        assert!(h.scheduler.eligible_tasks(h.clock.now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lead_tool_every_second_attempt() {
        let mut cfg = config();
        cfg.lead_tool = Some("form".into());
        cfg.lead_tool_every = 2;
        let h = harness(cfg);
        h.no_response_contact("c1").await;
        for _ in 0..3 {
            h.advance_hours(25);
            h.scheduler.run_cycle().await;
        }
        assert_eq!(
            h.sender.log(),
            vec!["c1:t1", "c1:tool:form", "c1:t2", "c1:t2"]
        );
        let contact = h.contacts.get("c1").await.unwrap().unwrap();
        assert!(contact.last_lead_tool_sent_at.is_some());
    }

    #[tokio::test]
    async fn oldest_contacts_go_first() {
        let h = harness(config());
        h.no_response_contact("older").await;
        h.advance_hours(2);
        h.no_response_contact("newer").await;
        h.advance_hours(30);

        let report = h.scheduler.run_cycle().await;
        assert_eq!(report.sent, 2);
        assert_eq!(h.sender.log(), vec!["older:t1", "newer:t1"]);
    }

    #[tokio::test]
    async fn global_quota_limits_and_resets_next_day() {
        let mut cfg = config();
        cfg.daily_quota = 1;
        let h = harness(cfg);
        h.no_response_contact("a").await;
        h.no_response_contact("b").await;
        h.advance_hours(25);

        let report = h.scheduler.run_cycle().await;
        assert_eq!(report.eligible, 2);
        assert_eq!(report.sent, 1);

        let report = h.scheduler.run_cycle().await;
        assert_eq!(report.skipped, Some(SkipReason::QuotaExhausted));

        // Next day: "b" has waited longest.
        h.advance_hours(25);
        let report = h.scheduler.run_cycle().await;
        assert_eq!(report.eligible, 2);
        assert_eq!(report.sent, 1);
        assert_eq!(h.sender.log(), vec!["a:t1", "b:t1"]);
    }

    #[tokio::test]
    async fn blacklisted_contacts_are_excluded() {
        let h = harness(config());
        h.no_response_contact("a").await;
        h.no_response_contact("b").await;
        h.contacts.blacklist("b").await.unwrap();
        h.advance_hours(25);

        let report = h.scheduler.run_cycle().await;
        assert_eq!(report.eligible, 1);
        assert_eq!(h.sender.log(), vec!["a:t1"]);
    }

    #[tokio::test]
    async fn failed_delivery_does_not_bump_counter() {
        let sender = RecordingSender::default();
        sender.fail_all.store(true, Ordering::SeqCst);
        let h = harness_with(config(), sender);
        h.no_response_contact("c1").await;
        h.advance_hours(25);

        let report = h.scheduler.run_cycle().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(h.sender.log().len(), 3);
        assert_eq!(
            h.contacts.get("c1").await.unwrap().unwrap().follow_up_count,
            0
        );
    }

    #[tokio::test]
    async fn skips_when_disabled_or_outside_hours() {
        let mut cfg = config();
        cfg.enabled = false;
        let h = harness(cfg);
        assert_eq!(
            h.scheduler.run_cycle().await.skipped,
            Some(SkipReason::Disabled)
        );

        let mut cfg = config();
        // 10:00 UTC start time is outside 18:00-22:00.
        cfg.working_hours = WorkingHours {
            start_hour: 18,
            end_hour: 22,
            utc_offset_minutes: 0,
        };
        let h = harness(cfg);
        assert_eq!(
            h.scheduler.run_cycle().await.skipped,
            Some(SkipReason::OutsideWorkingHours)
        );
    }

    #[tokio::test]
    async fn unavailable_store_skips_cycle() {
        let h = harness(config());
        h.no_response_contact("c1").await;
        h.advance_hours(25);
        h.kv.set_offline(true);
        assert_eq!(
            h.scheduler.run_cycle().await.skipped,
            Some(SkipReason::StoreUnavailable)
        );
        assert!(h.sender.log().is_empty());
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn overlapping_cycle_is_a_no_op() {
        let sender = RecordingSender {
            gate: Some(Notify::new()),
            ..Default::default()
        };
        let h = harness_with(config(), sender);
        h.no_response_contact("c1").await;
        h.advance_hours(25);

        let scheduler = h.scheduler.clone();
        let first = tokio::spawn(async move { scheduler.run_cycle().await });
        while h.sender.log().is_empty() {
            tokio::task::yield_now().await;
        }

        let second = h.scheduler.run_cycle().await;
        assert_eq!(second.skipped, Some(SkipReason::Reentrant));

        h.sender.gate.as_ref().unwrap().notify_one();
        let first = first.await.unwrap();
        assert_eq!(first.sent, 1);
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn ticker_stops_on_shutdown_flag() {
        let h = harness(config());
        let (handle, shutdown) =
            spawn_follow_up_ticker(h.scheduler.clone(), Duration::from_millis(5));
        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    fn inbound(contact: &str) -> crate::pipeline::types::Message {
        crate::pipeline::types::Message {
            id: format!("fp-{contact}"),
            contact_id: contact.into(),
            message_type: crate::pipeline::types::MessageType::Text,
            content: "hello?".into(),
            title: None,
            source_info: None,
            timestamp: start_time(),
            is_system_message: false,
            contact_name: None,
        }
    }
}
