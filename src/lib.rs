//! finflow - multi-agent financial analysis pipeline
//!
//! A fixed sequence of single-purpose agents (ingest -> categorize ->
//! analyze -> budget -> evaluate -> report) driven by an orchestrator
//! that enforces a finite-state workflow, gates risky steps behind human
//! approval, and wraps every step with retry, circuit-breaker, fallback
//! and checkpoint machinery.
//!
//! # Architecture
//!
//! - Each session runs on its own task; agents execute strictly
//!   sequentially within a session.
//! - Checkpoints are latest-only upserts keyed by session id, saved after
//!   every successful step, so a crashed session can be resumed.
//! - Circuit breaker state is in-memory and process-global (keyed by agent
//!   name); only transition events are persisted, for audit. A restart
//!   resets every circuit to closed.
//! - `Orchestrator::run` never propagates an error to the caller: a failed
//!   session still returns a well-formed result with the partial event log.
//!
//! # Modules
//!
//! - `agents`: Pipeline stages behind a uniform `Agent` trait
//! - `approval`: Threshold-gated human-in-the-loop checkpoints
//! - `compute`: Aggregation, anomaly detection, risk scoring, budgeting math
//! - `core`: Orchestrator state machine and the session event log
//! - `domain`: Workflow states, transactions, session context
//! - `memory`: Short-term session state and historical context compression
//! - `reliability`: Retry, circuit breaker, fallback, checkpoint, session guard
//! - `security`: Per-agent privilege table
//! - `storage`: SQLite-backed persistence shared by the managers

pub mod agents;
pub mod approval;
pub mod compute;
pub mod config;
pub mod core;
pub mod domain;
pub mod llm;
pub mod memory;
pub mod reliability;
pub mod security;
pub mod storage;

// Re-export main types at crate root for convenience
pub use crate::core::{Orchestrator, OrchestratorResult};
pub use domain::{SessionContext, Transaction, TransitionError, WorkflowState};
pub use storage::Database;

pub use approval::{ApprovalError, ApprovalManager, ApprovalStatus, ApprovalType};
pub use reliability::{
    AgentError, CheckpointManager, CircuitBreaker, CircuitState, FallbackManager,
    FallbackType, RetryError, RetryManager, SessionGuard, SessionLimitError,
    TerminationReason,
};
