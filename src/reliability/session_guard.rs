//! Hard caps on session iterations, token spend, and runtime.
//!
//! Stats live in SQLite keyed by session id, so concurrent sessions never
//! share a budget and a crashed process leaves an inspectable trail. Checks
//! are strict: a session may reach a cap exactly and terminates only once it
//! exceeds it. `increment_iteration` persists the new count before checking,
//! so the violating count itself is durable.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::storage::Database;

/// Resource caps for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCaps {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,

    #[serde(default = "default_max_runtime_seconds")]
    pub max_runtime_seconds: u64,
}

fn default_max_iterations() -> u32 {
    12
}
fn default_max_tokens() -> u64 {
    100_000
}
fn default_max_runtime_seconds() -> u64 {
    30
}

impl Default for SessionCaps {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            max_runtime_seconds: default_max_runtime_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    MaxIterations,
    MaxTokens,
    MaxRuntime,
    Error,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::MaxIterations => "max_iterations",
            TerminationReason::MaxTokens => "max_tokens",
            TerminationReason::MaxRuntime => "max_runtime",
            TerminationReason::Error => "error",
        }
    }

    fn parse(s: &str) -> Option<TerminationReason> {
        match s {
            "max_iterations" => Some(TerminationReason::MaxIterations),
            "max_tokens" => Some(TerminationReason::MaxTokens),
            "max_runtime" => Some(TerminationReason::MaxRuntime),
            "error" => Some(TerminationReason::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session crossed one of its caps.
#[derive(Debug, Clone, Error)]
#[error("session {session_id} terminated ({reason}): {detail}")]
pub struct SessionLimitError {
    pub session_id: String,
    pub reason: TerminationReason,
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    Limit(#[from] SessionLimitError),

    #[error("session guard storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Current resource usage for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    pub session_id: String,
    pub iteration: u32,
    pub tokens_used: u64,
    pub runtime_seconds: f64,
    pub start_time: String,
    pub termination_reason: Option<TerminationReason>,
}

/// Enforces `SessionCaps` against persisted per-session stats.
pub struct SessionGuard {
    caps: SessionCaps,
    db: Arc<Database>,
}

impl SessionGuard {
    pub fn new(caps: SessionCaps, db: Arc<Database>) -> SessionGuard {
        SessionGuard { caps, db }
    }

    /// Register a session with zeroed counters. Re-registering an existing
    /// session is a no-op.
    pub fn start_session(&self, session_id: &str) -> Result<(), GuardError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.conn();
        conn.execute(
            "INSERT OR IGNORE INTO session_stats
             (session_id, iteration, tokens_used, runtime_seconds, start_time, last_update)
             VALUES (?1, 0, 0, 0.0, ?2, ?2)",
            rusqlite::params![session_id, now],
        )
        .context("failed to start session stats")?;
        Ok(())
    }

    /// Check every cap, in order: iterations, then projected token spend,
    /// then runtime. `projected_tokens` is what the next operation would
    /// add on top of tokens already used.
    pub fn check_limits(&self, session_id: &str, projected_tokens: u64) -> Result<(), GuardError> {
        let stats = self
            .stats(session_id)?
            .ok_or_else(|| anyhow::anyhow!("unknown session: {session_id}"))
            .map_err(GuardError::Storage)?;

        if let Some(reason) = stats.termination_reason {
            return Err(self.terminate(session_id, reason, "session already terminated"));
        }

        if stats.iteration > self.caps.max_iterations {
            return Err(self.terminate(
                session_id,
                TerminationReason::MaxIterations,
                &format!(
                    "iteration {} exceeds cap {}",
                    stats.iteration, self.caps.max_iterations
                ),
            ));
        }

        let projected = stats.tokens_used + projected_tokens;
        if projected > self.caps.max_tokens {
            return Err(self.terminate(
                session_id,
                TerminationReason::MaxTokens,
                &format!(
                    "projected token use {} exceeds cap {}",
                    projected, self.caps.max_tokens
                ),
            ));
        }

        let runtime = self.runtime_seconds(&stats);
        if runtime > self.caps.max_runtime_seconds as f64 {
            return Err(self.terminate(
                session_id,
                TerminationReason::MaxRuntime,
                &format!(
                    "runtime {:.2}s exceeds cap {}s",
                    runtime, self.caps.max_runtime_seconds
                ),
            ));
        }

        Ok(())
    }

    /// Persist the next iteration count, then enforce the caps. The count
    /// is durable even when this call terminates the session.
    pub fn increment_iteration(&self, session_id: &str) -> Result<u32, GuardError> {
        let iteration = {
            let conn = self.db.conn();
            conn.execute(
                "UPDATE session_stats SET iteration = iteration + 1, last_update = ?2
                 WHERE session_id = ?1",
                rusqlite::params![session_id, Utc::now().to_rfc3339()],
            )
            .context("failed to increment iteration")?;
            conn.query_row(
                "SELECT iteration FROM session_stats WHERE session_id = ?1",
                [session_id],
                |row| row.get::<_, u32>(0),
            )
            .context("failed to read iteration")?
        };

        self.check_limits(session_id, 0)?;
        Ok(iteration)
    }

    /// Add to the session's token spend.
    pub fn record_tokens(&self, session_id: &str, tokens: u64) -> Result<(), GuardError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE session_stats SET tokens_used = tokens_used + ?2, last_update = ?3
             WHERE session_id = ?1",
            rusqlite::params![session_id, tokens, Utc::now().to_rfc3339()],
        )
        .context("failed to record token use")?;
        Ok(())
    }

    /// Terminate a session out of band, recording why. Subsequent checks
    /// fail with the same reason.
    pub fn force_terminate(
        &self,
        session_id: &str,
        reason: TerminationReason,
        detail: &str,
    ) -> SessionLimitError {
        match self.terminate(session_id, reason, detail) {
            GuardError::Limit(e) => e,
            GuardError::Storage(_) => SessionLimitError {
                session_id: session_id.to_string(),
                reason,
                detail: detail.to_string(),
            },
        }
    }

    pub fn stats(&self, session_id: &str) -> Result<Option<SessionStats>, GuardError> {
        let conn = self.db.conn();
        let row = conn
            .query_row(
                "SELECT session_id, iteration, tokens_used, runtime_seconds, start_time,
                        termination_reason
                 FROM session_stats WHERE session_id = ?1",
                [session_id],
                |row| {
                    Ok(SessionStats {
                        session_id: row.get(0)?,
                        iteration: row.get(1)?,
                        tokens_used: row.get(2)?,
                        runtime_seconds: row.get(3)?,
                        start_time: row.get(4)?,
                        termination_reason: row
                            .get::<_, Option<String>>(5)?
                            .as_deref()
                            .and_then(TerminationReason::parse),
                    })
                },
            )
            .optional()
            .context("failed to read session stats")?;
        Ok(row)
    }

    fn runtime_seconds(&self, stats: &SessionStats) -> f64 {
        DateTime::parse_from_rfc3339(&stats.start_time)
            .map(|start| (Utc::now() - start.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    fn terminate(
        &self,
        session_id: &str,
        reason: TerminationReason,
        detail: &str,
    ) -> GuardError {
        warn!(session_id, reason = reason.as_str(), detail, "session terminated");
        let conn = self.db.conn();
        let result = conn.execute(
            "UPDATE session_stats
             SET termination_reason = COALESCE(termination_reason, ?2), last_update = ?3
             WHERE session_id = ?1",
            rusqlite::params![session_id, reason.as_str(), Utc::now().to_rfc3339()],
        );
        if let Err(e) = result {
            warn!(error = %e, session_id, "failed to persist termination reason");
        }
        GuardError::Limit(SessionLimitError {
            session_id: session_id.to_string(),
            reason,
            detail: detail.to_string(),
        })
    }
}
