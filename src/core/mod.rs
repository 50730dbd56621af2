//! Orchestrator state machine and the session event log.

pub mod event_log;
pub mod orchestrator;

pub use event_log::EventLog;
pub use orchestrator::{Orchestrator, OrchestratorResult};
