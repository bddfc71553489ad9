//! End-to-end: inbound events → replies → multi-day follow-ups, on a libSQL store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream;

use reply_pilot::agent::{Agent, AgentDeps};
use reply_pilot::channels::{
    EventStream, MessageSource, RawEvent, SenderChannel, SourceEvent, TaggedContacts,
};
use reply_pilot::clock::{Clock, ManualClock};
use reply_pilot::config::{BucketConfig, PilotConfig, WorkingHours};
use reply_pilot::contacts::ContactStatus;
use reply_pilot::error::ChannelError;
use reply_pilot::followup::SkipReason;
use reply_pilot::llm::StaticGenerator;
use reply_pilot::pipeline::{ProcessOutcome, RulesEngine};
use reply_pilot::store::{KvStore, LibSqlKv};

struct NoSource;

#[async_trait]
impl MessageSource for NoSource {
    fn name(&self) -> &str {
        "none"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        Ok(Box::pin(stream::empty()))
    }
}

#[derive(Default)]
struct PageSender {
    sent: Mutex<Vec<String>>,
}

impl PageSender {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[async_trait]
impl SenderChannel for PageSender {
    async fn send_text(&self, contact_id: &str, text: &str) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(format!("{contact_id}:{text}"));
        Ok(())
    }

    async fn send_tool(&self, contact_id: &str, tool_ref: &str) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push(format!("{contact_id}:tool:{tool_ref}"));
        Ok(())
    }
}

const RULES: &str = r#"[
    {"id": "greeting", "priority": 1, "keywords": ["hello", "hi"], "response": "Hello! How can we help?"},
    {"id": "pricing", "priority": 10, "keywords": ["price", "cost"],
     "response": "Our packages start at $99.", "lead_tool": "pricing-form"},
    {"id": "smart", "priority": 5, "keywords": ["^why"], "match_type": "regex", "use_ai": true}
]"#;

fn config() -> PilotConfig {
    let mut config = PilotConfig::default();
    config.follow_up.enabled = true;
    config.follow_up.working_hours = WorkingHours {
        start_hour: 9,
        end_hour: 21,
        utc_offset_minutes: 0,
    };
    config.follow_up.no_contact = BucketConfig {
        enabled: true,
        interval: Duration::from_secs(24 * 3600),
        max_follow_ups: 2,
        templates: vec![
            "Still interested? Leave your number and we'll call.".into(),
            "Last check-in from us!".into(),
        ],
    };
    config
}

fn message(element: &str, contact: &str, content: &str) -> SourceEvent {
    SourceEvent::Message(RawEvent {
        element_id: Some(element.into()),
        contact_id: Some(contact.into()),
        content: Some(content.into()),
        ..Default::default()
    })
}

#[tokio::test]
async fn replies_then_follow_ups_over_several_days() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap());
    let kv: Arc<dyn KvStore> = Arc::new(LibSqlKv::new_memory().await.unwrap());
    let sender = Arc::new(PageSender::default());
    let probe = Arc::new(TaggedContacts::new());

    let agent = Agent::new(
        config(),
        RulesEngine::from_json(RULES).unwrap(),
        AgentDeps {
            kv,
            source: Arc::new(NoSource),
            sender: sender.clone(),
            probe: probe.clone(),
            generator: Arc::new(StaticGenerator::new("Because it saves you time.")),
            clock: Arc::new(clock.clone()),
        },
    );

    // ── Day 1: inbound traffic ──────────────────────────────────────
    agent
        .handle_event(SourceEvent::ContactOpened {
            contact_id: "alice".into(),
        })
        .await;
    agent.handle_event(message("a1", "alice", "Hi there")).await;
    agent.handle_event(message("a1", "alice", "Hi there")).await;
    agent
        .handle_event(message("a2", "alice", "What does it cost?"))
        .await;
    let outcome = agent.handle_event(message("b1", "bob", "why should I?")).await;
    assert!(matches!(
        outcome,
        Some(ProcessOutcome::Replied { generated: true, .. })
    ));

    probe.tag("carol");
    agent
        .handle_event(message("c1", "carol", "hello, call me on 555-0100"))
        .await;

    assert_eq!(
        sender.take(),
        vec![
            "alice:Hello! How can we help?",
            "alice:Our packages start at $99.",
            "alice:tool:pricing-form",
            "bob:Because it saves you time.",
            "carol:Hello! How can we help?",
        ]
    );

    let contacts = agent.contacts();
    assert_eq!(
        contacts.get("alice").await.unwrap().unwrap().status,
        ContactStatus::NoContact
    );
    assert_eq!(
        contacts.get("carol").await.unwrap().unwrap().status,
        ContactStatus::Converted
    );

    // Too early for follow-ups.
    let report = agent.scheduler().run_cycle().await;
    assert_eq!(report.eligible, 0);

    // ── Day 2: first round of follow-ups ────────────────────────────
    clock.advance(chrono::Duration::hours(25));
    contacts.blacklist("bob").await.unwrap();

    let report = agent.scheduler().run_cycle().await;
    assert_eq!(report.eligible, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(
        sender.take(),
        vec!["alice:Still interested? Leave your number and we'll call."]
    );

    // ── Night: outside working hours ────────────────────────────────
    clock.advance(chrono::Duration::hours(11));
    assert_eq!(
        agent.scheduler().run_cycle().await.skipped,
        Some(SkipReason::OutsideWorkingHours)
    );

    // ── Day 3: second and final template ────────────────────────────
    clock.advance(chrono::Duration::hours(14));
    let report = agent.scheduler().run_cycle().await;
    assert_eq!(report.sent, 1);
    assert_eq!(sender.take(), vec!["alice:Last check-in from us!"]);

    let alice = contacts.get("alice").await.unwrap().unwrap();
    assert_eq!(alice.follow_up_count, 2);
    assert_eq!(alice.last_follow_up_at, Some(clock.now()));

    // ── Day 4: max follow-ups reached ───────────────────────────────
    clock.advance(chrono::Duration::hours(25));
    let report = agent.scheduler().run_cycle().await;
    assert_eq!(report.eligible, 0);
    assert!(sender.take().is_empty());

    let stats = agent.queue().stats();
    assert_eq!(stats.sent, 7);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn unanswered_opener_gets_no_response_follow_up() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap());
    let kv: Arc<dyn KvStore> = Arc::new(LibSqlKv::new_memory().await.unwrap());
    let sender = Arc::new(PageSender::default());

    let mut config = config();
    config.follow_up.no_response = BucketConfig {
        enabled: true,
        interval: Duration::from_secs(24 * 3600),
        max_follow_ups: 1,
        templates: vec!["Did you see our offer?".into()],
    };

    let agent = Agent::new(
        config,
        RulesEngine::from_json(RULES).unwrap(),
        AgentDeps {
            kv,
            source: Arc::new(NoSource),
            sender: sender.clone(),
            probe: Arc::new(TaggedContacts::new()),
            generator: Arc::new(StaticGenerator::new("unused")),
            clock: Arc::new(clock.clone()),
        },
    );

    agent
        .handle_event(SourceEvent::OpenerSent {
            contact_id: "dana".into(),
            text: "Hi Dana, thanks for your interest!".into(),
        })
        .await;
    let contacts = agent.contacts();
    assert_eq!(
        contacts.get("dana").await.unwrap().unwrap().status,
        ContactStatus::NoResponse
    );

    clock.advance(chrono::Duration::hours(25));
    let report = agent.scheduler().run_cycle().await;
    assert_eq!(report.eligible, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(sender.take(), vec!["dana:Did you see our offer?"]);

    // The reply ends the no-response track.
    agent.handle_event(message("d1", "dana", "hello")).await;
    assert_eq!(sender.take(), vec!["dana:Hello! How can we help?"]);
    let dana = contacts.get("dana").await.unwrap().unwrap();
    assert_eq!(dana.status, ContactStatus::NoContact);
    assert_eq!(dana.follow_up_count, 1);
    assert_eq!(dana.conversation_history.len(), 4);
}
