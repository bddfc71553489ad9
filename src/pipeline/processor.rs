//! Message processor: turns raw observations into replies.
//!
//! Flow for each raw event:
//! 1. Normalizer → canonical `Message` (duplicates and stale events dropped)
//! 2. Contact store → history + status update (probe decides disclosure)
//! 3. Rules engine → literal reply, generated reply, or nothing
//! 4. Delivery queue → reply, then the rule's lead tool when one is due

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channels::RawEvent;
use crate::channels::channel::ContactInfoProbe;
use crate::clock::Clock;
use crate::config::AutoReplyConfig;
use crate::contacts::{Contact, ContactStore};
use crate::delivery::{DeliveryPayload, DeliveryQueue};
use crate::error::PipelineError;
use crate::llm::{TextGenerator, build_reply_prompt, clean_reply};
use crate::pipeline::normalizer::{Normalizer, Rejection};
use crate::pipeline::rules::{ReplySource, Rule, RulesEngine};
use crate::pipeline::types::Message;

/// Why a recorded message got no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoReplyReason {
    SystemMessage,
    AutoReplyDisabled,
    Blacklisted,
    /// No rule matched and AI fallback is off.
    NoMatch,
}

/// What happened to one raw event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The normalizer rejected the event; nothing was recorded.
    Dropped(Rejection),
    /// Recorded on the contact, no reply sent.
    NoReply {
        message_id: String,
        reason: NoReplyReason,
    },
    /// A reply was delivered.
    Replied {
        message_id: String,
        rule_id: Option<String>,
        generated: bool,
        /// Lead tool delivered after the reply, if any.
        lead_tool: Option<String>,
    },
}

/// Shared collaborators of the processor.
#[derive(Clone)]
pub struct PipelineDeps {
    pub normalizer: Arc<Normalizer>,
    pub contacts: Arc<ContactStore>,
    pub queue: Arc<DeliveryQueue>,
    pub probe: Arc<dyn ContactInfoProbe>,
    pub generator: Arc<dyn TextGenerator>,
    pub clock: Arc<dyn Clock>,
}

pub struct MessageProcessor {
    config: AutoReplyConfig,
    rules: RulesEngine,
    deps: PipelineDeps,
}

impl MessageProcessor {
    pub fn new(config: AutoReplyConfig, rules: RulesEngine, deps: PipelineDeps) -> Self {
        Self {
            config,
            rules,
            deps,
        }
    }

    pub fn normalizer(&self) -> &Arc<Normalizer> {
        &self.deps.normalizer
    }

    pub fn rules(&self) -> &RulesEngine {
        &self.rules
    }

    /// Normalize and process one raw event.
    pub async fn process(&self, raw: &RawEvent) -> Result<ProcessOutcome, PipelineError> {
        match self.deps.normalizer.try_normalize(raw) {
            Ok(message) => self.process_message(&message).await,
            Err(rejection) => {
                debug!(reason = ?rejection, "Raw event dropped");
                Ok(ProcessOutcome::Dropped(rejection))
            }
        }
    }

    /// Process an already-normalized message.
    pub async fn process_message(&self, message: &Message) -> Result<ProcessOutcome, PipelineError> {
        let contact_id = message.contact_id.as_str();
        info!(
            id = %message.id,
            contact_id = %contact_id,
            kind = %message.message_type,
            "Processing inbound message"
        );

        let disclosed = self.deps.probe.has_disclosed_contact_info(contact_id).await;
        let contact = self
            .deps
            .contacts
            .record_inbound(contact_id, message, disclosed)
            .await?;

        let skip = if message.is_system_message {
            Some(NoReplyReason::SystemMessage)
        } else if !self.config.enabled {
            Some(NoReplyReason::AutoReplyDisabled)
        } else if self.deps.contacts.is_blacklisted(contact_id).await? {
            Some(NoReplyReason::Blacklisted)
        } else {
            None
        };
        if let Some(reason) = skip {
            debug!(id = %message.id, reason = ?reason, "Not replying");
            return Ok(ProcessOutcome::NoReply {
                message_id: message.id.clone(),
                reason,
            });
        }

        let rule = self.rules.evaluate(message);
        let (text, generated) = match rule.map(Rule::reply_source) {
            Some(ReplySource::Literal(text)) => (text.to_string(), false),
            Some(ReplySource::Generated) => (self.generate(message, &contact).await?, true),
            None if self.config.ai_fallback => (self.generate(message, &contact).await?, true),
            None => {
                return Ok(ProcessOutcome::NoReply {
                    message_id: message.id.clone(),
                    reason: NoReplyReason::NoMatch,
                });
            }
        };

        self.deps
            .queue
            .enqueue(contact_id, DeliveryPayload::Text(text.clone()))
            .await?;
        self.deps.contacts.record_outbound(contact_id, &text).await?;

        let lead_tool = match rule.and_then(|r| r.lead_tool.as_deref()) {
            Some(tool_ref) => self.send_lead_tool(&contact, tool_ref).await?,
            None => None,
        };

        info!(
            id = %message.id,
            contact_id = %contact_id,
            rule = rule.map(|r| r.id.as_str()).unwrap_or("-"),
            generated,
            "Reply delivered"
        );

        Ok(ProcessOutcome::Replied {
            message_id: message.id.clone(),
            rule_id: rule.map(|r| r.id.clone()),
            generated,
            lead_tool,
        })
    }

    async fn generate(&self, message: &Message, contact: &Contact) -> Result<String, PipelineError> {
        let history = contact.recent_history(self.config.history_context);
        let prompt = build_reply_prompt(&self.config.system_prompt, message, history);
        let generator = &self.deps.generator;
        let raw = generator.generate(&prompt, history).await?;
        clean_reply(generator.name(), &raw).map_err(PipelineError::from)
    }

    /// Deliver the lead tool unless one went out within the cooldown.
    ///
    /// A failed delivery is logged and does not fail the message.
    async fn send_lead_tool(
        &self,
        contact: &Contact,
        tool_ref: &str,
    ) -> Result<Option<String>, PipelineError> {
        let now = self.deps.clock.now();
        if let Some(last) = contact.last_lead_tool_sent_at {
            let cooldown = chrono::Duration::from_std(self.config.lead_tool_cooldown)
                .unwrap_or(chrono::Duration::MAX);
            if now - last < cooldown {
                debug!(contact_id = %contact.id, "Lead tool still cooling down");
                return Ok(None);
            }
        }

        let payload = DeliveryPayload::Tool(tool_ref.to_string());
        let history_text = payload.history_text();
        if let Err(e) = self.deps.queue.enqueue(&contact.id, payload).await {
            warn!(contact_id = %contact.id, tool = %tool_ref, error = %e, "Lead tool delivery failed");
            return Ok(None);
        }
        self.deps.contacts.record_lead_tool(&contact.id, now).await?;
        self.deps
            .contacts
            .record_outbound(&contact.id, &history_text)
            .await?;
        Ok(Some(tool_ref.to_string()))
    }
}
