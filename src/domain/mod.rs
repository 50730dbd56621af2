//! Domain types for the finflow orchestrator.
//!
//! This module contains the core data structures:
//! - Workflow: states and the fixed transition table
//! - Transaction: transaction records and anomaly alerts
//! - Session: per-session context and the orchestrator result
//! - Events: rows of the append-only session event log

pub mod events;
pub mod session;
pub mod transaction;
pub mod workflow;

// Re-export commonly used types
pub use events::SessionEvent;
pub use session::SessionContext;
pub use transaction::{transactions_from_input, AnomalyAlert, Transaction};
pub use workflow::{TransitionError, WorkflowState};
