//! Agent module: component wiring and the main event loop.

pub mod agent_loop;

pub use agent_loop::{Agent, AgentDeps};
