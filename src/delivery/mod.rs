//! Outbound delivery: one queue, one send in flight at a time.

pub mod model;
pub mod queue;

pub use model::{DeliveryJob, DeliveryPayload, DeliveryStats};
pub use queue::{DeliveryOutcome, DeliveryQueue};
