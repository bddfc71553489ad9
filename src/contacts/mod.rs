//! Contact state: durable per-contact status, counters and history.

pub mod model;
pub mod store;

pub use model::{Contact, ContactStatus, HistoryEntry, HistoryRole};
pub use store::ContactStore;
