//! Follow-up campaigns toward contacts who went quiet.

pub mod hours;
pub mod quota;
pub mod scheduler;

pub use quota::{Allowance, QuotaTracker};
pub use scheduler::{
    CycleReport, FollowUpScheduler, FollowUpTask, SkipReason, TemplateSet, spawn_follow_up_ticker,
};
