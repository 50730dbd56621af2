//! Error taxonomy and retry with exponential backoff.
//!
//! Only transient errors (timeouts, lock contention, network) are retried.
//! Structural errors fail fast and wrap straight into a permanent-failure
//! signal. Every attempt is logged to an append-only audit table; duplicate
//! `(session, agent, attempt)` rows are ignored so replays are idempotent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::storage::Database;

/// Uniform error surface for agent execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("llm timeout: {0}")]
    Timeout(String),

    #[error("database lock contention: {0}")]
    LockContention(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("logic violation: {0}")]
    LogicViolation(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),
}

impl AgentError {
    /// Transient errors are eligible for backoff; structural ones are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Timeout(_) | AgentError::LockContention(_) | AgentError::Network(_)
        )
    }

    /// Stable name used in the audit log.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Timeout(_) => "timeout",
            AgentError::LockContention(_) => "lock_contention",
            AgentError::Network(_) => "network",
            AgentError::SchemaValidation(_) => "schema_validation",
            AgentError::CorruptedData(_) => "corrupted_data",
            AgentError::LogicViolation(_) => "logic_violation",
            AgentError::SecurityViolation(_) => "security_violation",
        }
    }
}

/// Terminal outcome of a retried execution.
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    /// All attempts failed, or a non-retryable error short-circuited.
    #[error("permanent failure after {attempts} attempt(s): {source}")]
    Permanent {
        #[source]
        source: AgentError,
        attempts: u32,
        non_retryable: bool,
    },

    /// Execution refused before it started; does not consume retry budget.
    #[error("circuit breaker is open for agent: {0}")]
    CircuitOpen(String),
}

/// Backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter as a fraction of the base delay.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// One row of the retry audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub timestamp: String,
    pub error_type: String,
    pub error_message: String,
    pub delay_used: f64,
    pub success: bool,
}

/// Retries agent executions with exponential backoff and jitter.
pub struct RetryManager {
    config: RetryConfig,
    db: Arc<Database>,
}

impl RetryManager {
    pub fn new(config: RetryConfig, db: Arc<Database>) -> RetryManager {
        RetryManager { config, db }
    }

    /// Backoff for a 0-indexed attempt:
    /// `min(max_delay, base * 2^attempt + uniform(0, jitter * base))`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let exponential = base * 2f64.powi(attempt as i32);
        let jitter = uniform(self.config.jitter * base);
        let delay = (exponential + jitter).min(self.config.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }

    /// Execute `op`, retrying transient failures with backoff.
    ///
    /// The backoff sleep suspends only this session's task; concurrent
    /// sessions keep running.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        session_id: &str,
        agent_name: &str,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match op().await {
                Ok(result) => {
                    if attempt > 0 {
                        self.log_attempt(session_id, agent_name, attempt, "", "", 0.0, true);
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_retryable() => {
                    self.log_attempt(
                        session_id,
                        agent_name,
                        attempt,
                        e.kind(),
                        &e.to_string(),
                        0.0,
                        false,
                    );
                    return Err(RetryError::Permanent {
                        attempts: attempt + 1,
                        non_retryable: true,
                        source: e,
                    });
                }
                Err(e) => {
                    if attempt < self.config.max_retries {
                        let delay = self.calculate_delay(attempt);
                        self.log_attempt(
                            session_id,
                            agent_name,
                            attempt,
                            e.kind(),
                            &e.to_string(),
                            delay.as_secs_f64(),
                            false,
                        );
                        warn!(
                            agent = agent_name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "agent failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        self.log_attempt(
                            session_id,
                            agent_name,
                            attempt,
                            e.kind(),
                            &e.to_string(),
                            0.0,
                            false,
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| {
            AgentError::LogicViolation("retry loop exhausted without a recorded error".to_string())
        });
        Err(RetryError::Permanent {
            attempts: self.config.max_retries + 1,
            non_retryable: false,
            source,
        })
    }

    /// Audit history for one agent within a session, in attempt order.
    pub fn retry_history(&self, session_id: &str, agent_name: &str) -> Vec<RetryAttempt> {
        let conn = self.db.conn();
        let mut stmt = match conn.prepare(
            "SELECT attempt_number, timestamp, error_type, error_message, delay_used, success
             FROM retry_attempts
             WHERE session_id = ?1 AND agent_name = ?2
             ORDER BY attempt_number ASC",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!(error = %e, "failed to query retry history");
                return Vec::new();
            }
        };

        let rows = stmt.query_map(rusqlite::params![session_id, agent_name], |row| {
            Ok(RetryAttempt {
                attempt_number: row.get(0)?,
                timestamp: row.get(1)?,
                error_type: row.get(2)?,
                error_message: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                delay_used: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                success: row.get::<_, i64>(5)? != 0,
            })
        });

        match rows {
            Ok(rows) => rows.filter_map(Result::ok).collect(),
            Err(e) => {
                warn!(error = %e, "failed to read retry history");
                Vec::new()
            }
        }
    }

    // Audit only; a duplicate (session, agent, attempt) insert is a no-op
    // and storage failures never affect control flow.
    fn log_attempt(
        &self,
        session_id: &str,
        agent_name: &str,
        attempt_number: u32,
        error_type: &str,
        error_message: &str,
        delay_used: f64,
        success: bool,
    ) {
        let conn = self.db.conn();
        let result = conn.execute(
            "INSERT OR IGNORE INTO retry_attempts
             (session_id, agent_name, attempt_number, timestamp, error_type, error_message, delay_used, success)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                session_id,
                agent_name,
                attempt_number,
                Utc::now().to_rfc3339(),
                error_type,
                error_message,
                delay_used,
                success as i64,
            ],
        );
        if let Err(e) = result {
            warn!(error = %e, agent = agent_name, "failed to log retry attempt");
        }
    }
}

/// Uniform sample from [0, max) milliseconds of jitter.
fn uniform(max: f64) -> f64 {
    if max <= 0.0 {
        return 0.0;
    }
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0.0;
    }
    let sample = u64::from_le_bytes(bytes) as f64 / u64::MAX as f64;
    sample * max
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_manager(max_retries: u32) -> RetryManager {
        RetryManager::new(
            RetryConfig {
                max_retries,
                base_delay_ms: 1,
                max_delay_ms: 5,
                jitter: 0.0,
            },
            Arc::new(Database::in_memory().unwrap()),
        )
    }

    #[test]
    fn test_error_classification() {
        assert!(AgentError::Timeout("t".into()).is_retryable());
        assert!(AgentError::LockContention("l".into()).is_retryable());
        assert!(AgentError::Network("n".into()).is_retryable());
        assert!(!AgentError::SchemaValidation("s".into()).is_retryable());
        assert!(!AgentError::CorruptedData("c".into()).is_retryable());
        assert!(!AgentError::LogicViolation("v".into()).is_retryable());
        assert!(!AgentError::SecurityViolation("x".into()).is_retryable());
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let manager = RetryManager::new(
            RetryConfig {
                max_retries: 3,
                base_delay_ms: 100,
                max_delay_ms: 300,
                jitter: 0.0,
            },
            Arc::new(Database::in_memory().unwrap()),
        );
        assert_eq!(manager.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(manager.calculate_delay(1), Duration::from_millis(200));
        // Capped at max_delay.
        assert_eq!(manager.calculate_delay(2), Duration::from_millis(300));
        assert_eq!(manager.calculate_delay(5), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_bounded() {
        let manager = RetryManager::new(
            RetryConfig {
                max_retries: 3,
                base_delay_ms: 100,
                max_delay_ms: 10_000,
                jitter: 0.5,
            },
            Arc::new(Database::in_memory().unwrap()),
        );
        for _ in 0..50 {
            let delay = manager.calculate_delay(0).as_millis() as u64;
            assert!((100..150).contains(&delay), "delay {delay} out of range");
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let manager = fast_manager(3);
        let calls = AtomicU32::new(0);

        let result = manager
            .execute_with_retry("s1", "analysis", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AgentError::Timeout("slow".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two failures plus the logged recovery attempt.
        let history = manager.retry_history("s1", "analysis");
        assert_eq!(history.len(), 3);
        assert!(history[2].success);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let manager = fast_manager(2);

        let result: Result<(), _> = manager
            .execute_with_retry("s1", "analysis", || async {
                Err(AgentError::Network("down".into()))
            })
            .await;

        match result.unwrap_err() {
            RetryError::Permanent {
                attempts,
                non_retryable,
                source,
            } => {
                assert_eq!(attempts, 3);
                assert!(!non_retryable);
                assert_eq!(source, AgentError::Network("down".into()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let manager = fast_manager(5);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = manager
            .execute_with_retry("s1", "ingestion", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AgentError::CorruptedData("bad json".into())) }
            })
            .await;

        match result.unwrap_err() {
            RetryError::Permanent {
                attempts,
                non_retryable,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert!(non_retryable);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.retry_history("s1", "ingestion").len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_attempt_logging_is_idempotent() {
        let manager = fast_manager(1);
        for _ in 0..2 {
            let _: Result<(), _> = manager
                .execute_with_retry("s1", "budgeting", || async {
                    Err(AgentError::Timeout("t".into()))
                })
                .await;
        }
        // Second run reuses attempt numbers 0 and 1; inserts are ignored.
        assert_eq!(manager.retry_history("s1", "budgeting").len(), 2);
    }
}
