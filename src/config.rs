//! Configuration types.
//!
//! A single [`PilotConfig`] value is built once at startup (defaults, then an
//! optional JSON file, then `REPLY_PILOT_*` environment overrides) and handed
//! to each component by value.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Serde helper: `Duration` as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub dedup: DedupConfig,
    pub auto_reply: AutoReplyConfig,
    pub delivery: DeliveryConfig,
    pub follow_up: FollowUpConfig,
}

/// Event normalizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Recent fingerprints remembered (FIFO eviction).
    pub capacity: usize,
    /// Events older than this are dropped.
    #[serde(with = "duration_ms")]
    pub stale_after: Duration,
    /// Window after switching the active contact during which stale events
    /// for that contact are still accepted.
    #[serde(with = "duration_ms")]
    pub grace_window: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            stale_after: Duration::from_secs(120),
            grace_window: Duration::from_secs(10),
        }
    }
}

/// Inbound auto-reply settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoReplyConfig {
    /// Master switch for replying to inbound messages.
    pub enabled: bool,
    /// Ask the text generator when no rule matches.
    pub ai_fallback: bool,
    /// System prompt prepended to every generation request.
    pub system_prompt: String,
    /// Number of history entries passed to the generator.
    pub history_context: usize,
    /// Cap on stored conversation history per contact.
    pub max_history: usize,
    /// Minimum gap between two rule-triggered lead tool sends to one contact.
    #[serde(with = "duration_ms")]
    pub lead_tool_cooldown: Duration,
}

impl Default for AutoReplyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ai_fallback: false,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_context: 10,
            max_history: 50,
            lead_tool_cooldown: Duration::from_secs(24 * 3600),
        }
    }
}

/// Default system prompt for AI replies.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly sales assistant replying to a \
prospective customer in a chat window. Keep replies short (1-3 sentences), natural, and \
steer the conversation toward the customer sharing a phone number or other contact detail.";

/// Delivery queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Attempts per job before it is failed.
    pub max_send_retries: u32,
    /// Delay before a failed job is retried from the front of the queue.
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// Pause after an internal fault before the queue resumes.
    #[serde(with = "duration_ms")]
    pub internal_cooldown: Duration,
    /// Upper bound on a single attempt; a stuck send is abandoned after this.
    #[serde(with = "duration_ms")]
    pub lock_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_send_retries: 3,
            retry_delay: Duration::from_secs(1),
            internal_cooldown: Duration::from_millis(500),
            lock_timeout: Duration::from_secs(15),
        }
    }
}

/// Per-bucket follow-up settings (no-response or no-contact).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    pub enabled: bool,
    /// Minimum time since the last follow-up (or first contact).
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    pub max_follow_ups: u32,
    /// Ordered templates; the Nth follow-up uses the Nth entry, clamped to the last.
    pub templates: Vec<String>,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(24 * 3600),
            max_follow_ups: 3,
            templates: Vec::new(),
        }
    }
}

/// Local working hours in a fixed UTC offset. `start_hour == end_hour` means always open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingHours {
    pub start_hour: u32,
    pub end_hour: u32,
    pub utc_offset_minutes: i32,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 21,
            utc_offset_minutes: 0,
        }
    }
}

/// Follow-up scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowUpConfig {
    pub enabled: bool,
    /// How often the ticker runs a cycle.
    #[serde(with = "duration_ms")]
    pub check_interval: Duration,
    pub no_response: BucketConfig,
    pub no_contact: BucketConfig,
    /// Follow-ups per local day across all contacts.
    pub daily_quota: u32,
    /// Follow-ups per local day for a single contact.
    pub per_contact_daily_quota: u32,
    /// Pause between two contacts within a cycle.
    #[serde(with = "duration_ms")]
    pub pacing: Duration,
    /// Upper bound of random extra pacing.
    #[serde(with = "duration_ms")]
    pub pacing_jitter: Duration,
    pub working_hours: WorkingHours,
    /// Lead tool reference sent ahead of every `lead_tool_every`-th attempt.
    pub lead_tool: Option<String>,
    /// 0 disables lead tool sends from the scheduler.
    pub lead_tool_every: u32,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: Duration::from_secs(300),
            no_response: BucketConfig::default(),
            no_contact: BucketConfig::default(),
            daily_quota: 50,
            per_contact_daily_quota: 1,
            pacing: Duration::from_secs(2),
            pacing_jitter: Duration::from_millis(500),
            working_hours: WorkingHours::default(),
            lead_tool: None,
            lead_tool_every: 0,
        }
    }
}

impl PilotConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `REPLY_PILOT_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<bool>("REPLY_PILOT_AUTO_REPLY") {
            self.auto_reply.enabled = v;
        }
        if let Some(v) = env_parse::<bool>("REPLY_PILOT_AI_FALLBACK") {
            self.auto_reply.ai_fallback = v;
        }
        if let Ok(v) = std::env::var("REPLY_PILOT_SYSTEM_PROMPT") {
            self.auto_reply.system_prompt = v;
        }
        if let Some(v) = env_parse::<bool>("REPLY_PILOT_FOLLOW_UP") {
            self.follow_up.enabled = v;
        }
        if let Some(v) = env_parse::<u64>("REPLY_PILOT_CHECK_INTERVAL_SECS") {
            self.follow_up.check_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u32>("REPLY_PILOT_DAILY_QUOTA") {
            self.follow_up.daily_quota = v;
        }
        if let Some(v) = env_parse::<u32>("REPLY_PILOT_WORK_START") {
            self.follow_up.working_hours.start_hour = v;
        }
        if let Some(v) = env_parse::<u32>("REPLY_PILOT_WORK_END") {
            self.follow_up.working_hours.end_hour = v;
        }
        if let Some(v) = env_parse::<i32>("REPLY_PILOT_UTC_OFFSET_MIN") {
            self.follow_up.working_hours.utc_offset_minutes = v;
        }
        if let Some(v) = env_parse::<u32>("REPLY_PILOT_MAX_RETRIES") {
            self.delivery.max_send_retries = v;
        }
        self
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Reject values the components cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dedup.capacity == 0 {
            return Err(invalid("dedup.capacity", "must be at least 1"));
        }
        if self.delivery.max_send_retries == 0 {
            return Err(invalid("delivery.max_send_retries", "must be at least 1"));
        }
        let hours = &self.follow_up.working_hours;
        if hours.start_hour > 23 || hours.end_hour > 24 {
            return Err(invalid(
                "follow_up.working_hours",
                &format!("hours out of range: {}..{}", hours.start_hour, hours.end_hour),
            ));
        }
        if hours.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(invalid(
                "follow_up.working_hours.utc_offset_minutes",
                "must be within one day",
            ));
        }
        if self.follow_up.check_interval.is_zero() {
            return Err(invalid("follow_up.check_interval", "must be non-zero"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
