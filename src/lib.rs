//! Reply Pilot: chat auto-reply and follow-up orchestrator core.

pub mod agent;
pub mod channels;
pub mod clock;
pub mod config;
pub mod contacts;
pub mod delivery;
pub mod error;
pub mod followup;
pub mod llm;
pub mod pipeline;
pub mod store;
