//! Latest-only durable snapshots for crash recovery.
//!
//! One checkpoint row per session, upserted after every completed stage.
//! Marking a session complete freezes the row: later saves are refused so a
//! finished session can never be silently reopened by a stale writer.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::WorkflowState;
use crate::storage::Database;

/// Durable snapshot of a session mid-flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub session_id: String,
    pub user_id: String,
    pub current_state: WorkflowState,
    pub completed_agents: Vec<String>,
    pub partial_outputs: BTreeMap<String, Value>,
    pub iteration: u32,
    pub timestamp: String,
    pub is_complete: bool,
}

impl Checkpoint {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        current_state: WorkflowState,
    ) -> Checkpoint {
        Checkpoint {
            session_id: session_id.into(),
            user_id: user_id.into(),
            current_state,
            completed_agents: Vec::new(),
            partial_outputs: BTreeMap::new(),
            iteration: 0,
            timestamp: Utc::now().to_rfc3339(),
            is_complete: false,
        }
    }
}

/// Saves and restores per-session checkpoints.
pub struct CheckpointManager {
    db: Arc<Database>,
}

impl CheckpointManager {
    pub fn new(db: Arc<Database>) -> CheckpointManager {
        CheckpointManager { db }
    }

    /// Upsert the session's checkpoint. Returns `false` without writing when
    /// the stored checkpoint is already complete.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let conn = self.db.conn();

        let completed: Option<i64> = conn
            .query_row(
                "SELECT is_complete FROM checkpoints WHERE session_id = ?1",
                [&checkpoint.session_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read checkpoint completion flag")?;
        if completed == Some(1) {
            warn!(
                session_id = %checkpoint.session_id,
                "refusing checkpoint write for completed session"
            );
            return Ok(false);
        }

        let completed_agents = serde_json::to_string(&checkpoint.completed_agents)
            .context("failed to serialize completed agents")?;
        let partial_outputs = serde_json::to_string(&checkpoint.partial_outputs)
            .context("failed to serialize partial outputs")?;

        conn.execute(
            "INSERT INTO checkpoints
             (session_id, user_id, current_state, completed_agents, partial_outputs,
              iteration, timestamp, is_complete)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(session_id) DO UPDATE SET
                user_id = excluded.user_id,
                current_state = excluded.current_state,
                completed_agents = excluded.completed_agents,
                partial_outputs = excluded.partial_outputs,
                iteration = excluded.iteration,
                timestamp = excluded.timestamp,
                is_complete = excluded.is_complete",
            rusqlite::params![
                checkpoint.session_id,
                checkpoint.user_id,
                checkpoint.current_state.as_str(),
                completed_agents,
                partial_outputs,
                checkpoint.iteration,
                Utc::now().to_rfc3339(),
                checkpoint.is_complete as i64,
            ],
        )
        .context("failed to save checkpoint")?;

        debug!(
            session_id = %checkpoint.session_id,
            state = %checkpoint.current_state,
            "checkpoint saved"
        );
        Ok(true)
    }

    /// Load the session's checkpoint, if any.
    pub fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let conn = self.db.conn();
        let row = conn
            .query_row(
                "SELECT session_id, user_id, current_state, completed_agents, partial_outputs,
                        iteration, timestamp, is_complete
                 FROM checkpoints WHERE session_id = ?1",
                [session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()
            .context("failed to load checkpoint")?;

        let Some((
            session_id,
            user_id,
            state_str,
            completed_agents,
            partial_outputs,
            iteration,
            timestamp,
            is_complete,
        )) = row
        else {
            return Ok(None);
        };

        let current_state = WorkflowState::parse(&state_str)
            .with_context(|| format!("checkpoint has unknown state: {state_str}"))?;
        let completed_agents: Vec<String> = serde_json::from_str(&completed_agents)
            .context("failed to deserialize completed agents")?;
        let partial_outputs: BTreeMap<String, Value> = serde_json::from_str(&partial_outputs)
            .context("failed to deserialize partial outputs")?;

        Ok(Some(Checkpoint {
            session_id,
            user_id,
            current_state,
            completed_agents,
            partial_outputs,
            iteration,
            timestamp,
            is_complete: is_complete != 0,
        }))
    }

    /// A session is resumable when a checkpoint exists and is not complete.
    pub fn has_checkpoint(&self, session_id: &str) -> bool {
        let conn = self.db.conn();
        conn.query_row(
            "SELECT 1 FROM checkpoints WHERE session_id = ?1 AND is_complete = 0",
            [session_id],
            |_| Ok(()),
        )
        .optional()
        .ok()
        .flatten()
        .is_some()
    }

    /// Freeze the session's checkpoint.
    pub fn mark_complete(&self, session_id: &str) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE checkpoints SET is_complete = 1, timestamp = ?2 WHERE session_id = ?1",
            rusqlite::params![session_id, Utc::now().to_rfc3339()],
        )
        .context("failed to mark checkpoint complete")?;
        Ok(())
    }

    /// Sessions interrupted mid-flight, for the crash-recovery sweep.
    pub fn incomplete_sessions(&self) -> Result<Vec<String>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare("SELECT session_id FROM checkpoints WHERE is_complete = 0 ORDER BY timestamp ASC")
            .context("failed to query incomplete sessions")?;
        let sessions = stmt
            .query_map([], |row| row.get(0))
            .context("failed to read incomplete sessions")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("failed to collect incomplete sessions")?;
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> CheckpointManager {
        CheckpointManager::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn checkpoint(session_id: &str, state: WorkflowState) -> Checkpoint {
        let mut cp = Checkpoint::new(session_id, "user-1", state);
        cp.completed_agents = vec!["ingestion".to_string()];
        cp.partial_outputs
            .insert("ingestion".to_string(), json!({"count": 3}));
        cp.iteration = 1;
        cp
    }

    #[test]
    fn test_save_load_round_trip() {
        let cm = manager();
        let cp = checkpoint("s1", WorkflowState::Categorize);
        assert!(cm.save(&cp).unwrap());

        let loaded = cm.load("s1").unwrap().unwrap();
        assert_eq!(loaded.current_state, WorkflowState::Categorize);
        assert_eq!(loaded.completed_agents, vec!["ingestion"]);
        assert_eq!(loaded.partial_outputs["ingestion"], json!({"count": 3}));
        assert!(!loaded.is_complete);
    }

    #[test]
    fn test_save_upserts_latest_only() {
        let cm = manager();
        cm.save(&checkpoint("s1", WorkflowState::Ingest)).unwrap();

        let mut later = checkpoint("s1", WorkflowState::Analyze);
        later.iteration = 3;
        cm.save(&later).unwrap();

        let loaded = cm.load("s1").unwrap().unwrap();
        assert_eq!(loaded.current_state, WorkflowState::Analyze);
        assert_eq!(loaded.iteration, 3);

        let count: i64 = cm
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM checkpoints", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_completed_session_refuses_writes() {
        let cm = manager();
        cm.save(&checkpoint("s1", WorkflowState::Report)).unwrap();
        cm.mark_complete("s1").unwrap();

        assert!(!cm.has_checkpoint("s1"));
        let saved = cm.save(&checkpoint("s1", WorkflowState::Ingest)).unwrap();
        assert!(!saved);

        // The frozen row is untouched.
        let loaded = cm.load("s1").unwrap().unwrap();
        assert_eq!(loaded.current_state, WorkflowState::Report);
        assert!(loaded.is_complete);
    }

    #[test]
    fn test_has_checkpoint() {
        let cm = manager();
        assert!(!cm.has_checkpoint("missing"));
        cm.save(&checkpoint("s1", WorkflowState::Budget)).unwrap();
        assert!(cm.has_checkpoint("s1"));
    }

    #[test]
    fn test_incomplete_sessions_sweep() {
        let cm = manager();
        cm.save(&checkpoint("s1", WorkflowState::Analyze)).unwrap();
        cm.save(&checkpoint("s2", WorkflowState::Budget)).unwrap();
        cm.mark_complete("s2").unwrap();

        assert_eq!(cm.incomplete_sessions().unwrap(), vec!["s1".to_string()]);
    }
}
