//! Inbound message pipeline.
//!
//! Every raw observation flows through:
//! 1. `Normalizer::normalize()`: canonical message after dedup and staleness checks
//! 2. `RulesEngine::evaluate()`: highest-priority matching rule
//! 3. `MessageProcessor::process()`: contact update, reply resolution, delivery

pub mod normalizer;
pub mod processor;
pub mod rules;
pub mod types;

pub use normalizer::{Normalizer, Rejection};
pub use processor::{MessageProcessor, NoReplyReason, PipelineDeps, ProcessOutcome};
pub use rules::{MatchLogic, MatchType, Rule, RulesEngine};
pub use types::{Message, MessageType};
