//! Reliability layer wrapped around every agent execution.
//!
//! This module contains:
//! - Retry: error classification and exponential backoff with jitter
//! - CircuitBreaker: per-agent rolling error-rate gate
//! - Fallback: deterministic substitute outputs for failed agents
//! - Checkpoint: latest-only durable snapshots for crash recovery
//! - SessionGuard: hard caps on iterations, tokens, and runtime

pub mod checkpoint;
pub mod circuit_breaker;
pub mod fallback;
pub mod retry;
pub mod session_guard;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats};
pub use fallback::{FallbackEvent, FallbackManager, FallbackType};
pub use retry::{AgentError, RetryAttempt, RetryConfig, RetryError, RetryManager};
pub use session_guard::{
    GuardError, SessionCaps, SessionGuard, SessionLimitError, SessionStats, TerminationReason,
};
