//! Error types for reply-pilot.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors from the key-value store and the contact store on top of it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Contact not found: {0}")]
    ContactNotFound(String),
}

/// Source and sender channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Send to {contact_id} failed: {reason}")]
    SendFailed { contact_id: String, reason: String },

    #[error("Send to {contact_id} could not be verified")]
    NotVerified { contact_id: String },

    #[error("Channel unavailable: {0}")]
    Unavailable(String),
}

/// Delivery queue outcomes that reach the caller of `enqueue`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("Job {job_id} for {contact_id} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        job_id: Uuid,
        contact_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Job {job_id} for {contact_id} aborted by internal fault: {reason}")]
    Internal {
        job_id: Uuid,
        contact_id: String,
        reason: String,
    },

    #[error("Job {job_id} for {contact_id} was cancelled before it started")]
    Cancelled { job_id: Uuid, contact_id: String },

    #[error("Delivery attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Delivery queue dropped the job before reporting an outcome")]
    Dropped,
}

/// Text generation errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Generator {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Generator {provider} returned an empty reply")]
    EmptyResponse { provider: String },

    #[error("Generator not configured")]
    NotConfigured,
}

/// Message pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Rules could not be loaded: {0}")]
    Rules(String),

    #[error("Reply generation failed: {0}")]
    Reply(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
