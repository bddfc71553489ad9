//! Main agent loop: wires the components and drives the source stream.
//!
//! The Agent owns one of each component (normalizer, contact store, rules,
//! delivery queue, follow-up scheduler), feeds every source event through
//! the message processor, and runs the follow-up ticker alongside.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::channels::channel::{ContactInfoProbe, MessageSource, SenderChannel, SourceEvent};
use crate::clock::Clock;
use crate::config::PilotConfig;
use crate::contacts::ContactStore;
use crate::delivery::DeliveryQueue;
use crate::error::Error;
use crate::followup::{FollowUpScheduler, spawn_follow_up_ticker};
use crate::llm::TextGenerator;
use crate::pipeline::{MessageProcessor, Normalizer, PipelineDeps, ProcessOutcome, RulesEngine};
use crate::store::KvStore;

/// Core dependencies for the agent.
///
/// Bundles the collaborators to reduce argument count.
pub struct AgentDeps {
    pub kv: Arc<dyn KvStore>,
    pub source: Arc<dyn MessageSource>,
    pub sender: Arc<dyn SenderChannel>,
    pub probe: Arc<dyn ContactInfoProbe>,
    pub generator: Arc<dyn TextGenerator>,
    pub clock: Arc<dyn Clock>,
}

/// The orchestrator.
pub struct Agent {
    config: PilotConfig,
    deps: AgentDeps,
    processor: MessageProcessor,
    contacts: Arc<ContactStore>,
    queue: Arc<DeliveryQueue>,
    scheduler: Arc<FollowUpScheduler>,
}

impl Agent {
    pub fn new(config: PilotConfig, rules: RulesEngine, deps: AgentDeps) -> Self {
        let contacts = Arc::new(ContactStore::new(
            Arc::clone(&deps.kv),
            Arc::clone(&deps.clock),
            config.auto_reply.max_history,
        ));
        let queue = DeliveryQueue::new(
            config.delivery.clone(),
            Arc::clone(&deps.sender),
            Arc::clone(&deps.clock),
        );
        let normalizer = Arc::new(Normalizer::new(config.dedup.clone(), Arc::clone(&deps.clock)));

        let processor = MessageProcessor::new(
            config.auto_reply.clone(),
            rules,
            PipelineDeps {
                normalizer,
                contacts: Arc::clone(&contacts),
                queue: Arc::clone(&queue),
                probe: Arc::clone(&deps.probe),
                generator: Arc::clone(&deps.generator),
                clock: Arc::clone(&deps.clock),
            },
        );

        let scheduler = Arc::new(FollowUpScheduler::new(
            config.follow_up.clone(),
            Arc::clone(&contacts),
            Arc::clone(&queue),
            Arc::clone(&deps.kv),
            Arc::clone(&deps.clock),
        ));

        Self {
            config,
            deps,
            processor,
            contacts,
            queue,
            scheduler,
        }
    }

    // ── Convenience accessors ───────────────────────────────────────

    pub fn processor(&self) -> &MessageProcessor {
        &self.processor
    }

    pub fn contacts(&self) -> &Arc<ContactStore> {
        &self.contacts
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<FollowUpScheduler> {
        &self.scheduler
    }

    // ── Event handling ──────────────────────────────────────────────

    /// Handle one source event. Errors are logged, never propagated.
    pub async fn handle_event(&self, event: SourceEvent) -> Option<ProcessOutcome> {
        match event {
            SourceEvent::ContactOpened { contact_id } => {
                debug!(contact_id = %contact_id, "Active contact switched");
                self.processor.normalizer().set_active_contact(&contact_id);
                None
            }
            SourceEvent::OpenerSent { contact_id, text } => {
                if let Err(e) = self.contacts.record_opener(&contact_id, &text).await {
                    error!(contact_id = %contact_id, error = %e, "Failed to record opener");
                }
                None
            }
            SourceEvent::Message(raw) => match self.processor.process(&raw).await {
                Ok(outcome) => {
                    if !matches!(outcome, ProcessOutcome::Dropped(_)) {
                        self.persist_fingerprints().await;
                    }
                    Some(outcome)
                }
                Err(e) => {
                    error!(
                        contact_id = raw.contact_id.as_deref().unwrap_or("-"),
                        error = %e,
                        "Failed to process message"
                    );
                    None
                }
            },
        }
    }

    async fn persist_fingerprints(&self) {
        if let Err(e) = self.processor.normalizer().persist(self.deps.kv.as_ref()).await {
            warn!(error = %e, "Failed to persist dedup fingerprints");
        }
    }

    // ── Main loop ───────────────────────────────────────────────────

    /// Run until the source ends or Ctrl+C.
    pub async fn run(self) -> Result<(), Error> {
        match self.processor.normalizer().restore(self.deps.kv.as_ref()).await {
            Ok(restored) => debug!(restored, "Dedup fingerprints restored"),
            Err(e) => warn!(error = %e, "Could not restore dedup fingerprints"),
        }

        let mut events = self.deps.source.start().await?;

        let ticker = if self.config.follow_up.enabled {
            Some(spawn_follow_up_ticker(
                Arc::clone(&self.scheduler),
                self.config.follow_up.check_interval,
            ))
        } else {
            None
        };

        info!(
            source = self.deps.source.name(),
            rules = self.processor.rules().len(),
            follow_up = self.config.follow_up.enabled,
            "Reply pilot ready and listening"
        );

        loop {
            let event = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, shutting down...");
                    break;
                }
                event = events.next() => {
                    match event {
                        Some(e) => e,
                        None => {
                            info!("Source stream ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            self.handle_event(event).await;
        }

        // Cleanup
        if let Some((handle, shutdown)) = ticker {
            shutdown.store(true, Ordering::Relaxed);
            handle.abort();
        }
        self.persist_fingerprints().await;

        let stats = self.queue.stats();
        info!(
            sent = stats.sent,
            failed = stats.failed,
            retried = stats.retried,
            "Reply pilot stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use futures::stream;

    use crate::channels::channel::{EventStream, RawEvent, TaggedContacts};
    use crate::clock::ManualClock;
    use crate::contacts::ContactStatus;
    use crate::error::ChannelError;
    use crate::llm::NullGenerator;
    use crate::pipeline::{Rejection, Rule};
    use crate::pipeline::normalizer::FINGERPRINTS_KEY;
    use crate::store::MemoryKv;

    struct VecSource {
        events: StdMutex<Vec<SourceEvent>>,
    }

    #[async_trait]
    impl MessageSource for VecSource {
        fn name(&self) -> &str {
            "vec"
        }

        async fn start(&self) -> Result<EventStream, ChannelError> {
            let events = std::mem::take(&mut *self.events.lock().unwrap());
            Ok(Box::pin(stream::iter(events)))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl MessageSource for FailingSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn start(&self) -> Result<EventStream, ChannelError> {
            Err(ChannelError::StartupFailed {
                name: "broken".into(),
                reason: "page not found".into(),
            })
        }
    }

    #[derive(Default)]
    struct LogSender {
        sent: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl SenderChannel for LogSender {
        async fn send_text(&self, contact_id: &str, text: &str) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(format!("{contact_id}:{text}"));
            Ok(())
        }

        async fn send_tool(&self, contact_id: &str, tool_ref: &str) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(format!("{contact_id}:tool:{tool_ref}"));
            Ok(())
        }
    }

    fn message(element: &str, contact: &str, content: &str) -> SourceEvent {
        SourceEvent::Message(RawEvent {
            element_id: Some(element.into()),
            contact_id: Some(contact.into()),
            content: Some(content.into()),
            ..Default::default()
        })
    }

    fn agent_with(
        source: Arc<dyn MessageSource>,
        kv: Arc<MemoryKv>,
        sender: Arc<LogSender>,
    ) -> Agent {
        let rules = RulesEngine::new(vec![Rule::new("hi", 1, &["hello"]).with_response("Hi!")]);
        Agent::new(
            PilotConfig::default(),
            rules,
            AgentDeps {
                kv,
                source,
                sender,
                probe: Arc::new(TaggedContacts::new()),
                generator: Arc::new(NullGenerator),
                clock: Arc::new(ManualClock::new(Utc::now())),
            },
        )
    }

    #[tokio::test]
    async fn run_drains_source_and_persists_fingerprints() {
        let kv = Arc::new(MemoryKv::new());
        let sender = Arc::new(LogSender::default());
        let source = Arc::new(VecSource {
            events: StdMutex::new(vec![
                SourceEvent::ContactOpened {
                    contact_id: "c1".into(),
                },
                message("e1", "c1", "hello there"),
                message("e1", "c1", "hello there"),
                message("e2", "c2", "hello"),
            ]),
        });

        agent_with(source, kv.clone(), sender.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(*sender.sent.lock().unwrap(), vec!["c1:Hi!", "c2:Hi!"]);
        let ring = kv.get(FINGERPRINTS_KEY).await.unwrap().unwrap();
        assert_eq!(ring.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fingerprints_survive_restart() {
        let kv = Arc::new(MemoryKv::new());
        let sender = Arc::new(LogSender::default());
        let first = Arc::new(VecSource {
            events: StdMutex::new(vec![message("e1", "c1", "hello")]),
        });
        agent_with(first, kv.clone(), sender.clone()).run().await.unwrap();

        let replay = Arc::new(VecSource {
            events: StdMutex::new(vec![message("e1", "c1", "hello")]),
        });
        agent_with(replay, kv, sender.clone()).run().await.unwrap();

        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn handle_event_reports_outcomes() {
        let kv = Arc::new(MemoryKv::new());
        let sender = Arc::new(LogSender::default());
        let source = Arc::new(VecSource {
            events: StdMutex::new(Vec::new()),
        });
        let agent = agent_with(source, kv, sender);

        assert!(
            agent
                .handle_event(SourceEvent::ContactOpened {
                    contact_id: "c1".into()
                })
                .await
                .is_none()
        );
        assert!(matches!(
            agent.handle_event(message("e1", "c1", "good day")).await,
            Some(ProcessOutcome::NoReply { .. })
        ));
        assert_eq!(
            agent.handle_event(message("e1", "c1", "good day")).await,
            Some(ProcessOutcome::Dropped(Rejection::Duplicate))
        );
        let contact = agent.contacts().get("c1").await.unwrap().unwrap();
        assert_eq!(contact.status, ContactStatus::NoContact);
    }

    #[tokio::test]
    async fn source_startup_failure_is_returned() {
        let kv = Arc::new(MemoryKv::new());
        let sender = Arc::new(LogSender::default());
        let err = agent_with(Arc::new(FailingSource), kv, sender)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Channel(ChannelError::StartupFailed { .. })));
    }
}
