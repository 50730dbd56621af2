//! Append-only session event log.
//!
//! Every agent execution and every failure lands here in insert order;
//! replaying a session returns exactly what the orchestrator observed.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::domain::SessionEvent;
use crate::storage::Database;

pub struct EventLog {
    db: Arc<Database>,
}

impl EventLog {
    pub fn new(db: Arc<Database>) -> EventLog {
        EventLog { db }
    }

    /// Append one event.
    pub fn log_event(&self, event: &SessionEvent) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO events
             (session_id, state, agent_name, input_payload, output_payload, error_flag, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                event.session_id,
                event.state,
                event.agent_name,
                event.input_payload.to_string(),
                event.output_payload.to_string(),
                event.error_flag as i64,
                event.timestamp.to_rfc3339(),
            ],
        )
        .context("failed to append session event")?;
        debug!(
            session_id = %event.session_id,
            state = %event.state,
            agent = %event.agent_name,
            error = event.error_flag,
            "event logged"
        );
        Ok(())
    }

    /// All events for a session, in insert order.
    pub fn replay_session(&self, session_id: &str) -> Result<Vec<SessionEvent>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(
                "SELECT session_id, state, agent_name, input_payload, output_payload,
                        error_flag, timestamp
                 FROM events WHERE session_id = ?1 ORDER BY id ASC",
            )
            .context("failed to prepare event replay")?;
        let events = stmt
            .query_map([session_id], |row| {
                let input: String = row.get(3)?;
                let output: String = row.get(4)?;
                let timestamp: String = row.get(6)?;
                Ok(SessionEvent {
                    session_id: row.get(0)?,
                    state: row.get(1)?,
                    agent_name: row.get(2)?,
                    input_payload: serde_json::from_str(&input).unwrap_or(Value::Null),
                    output_payload: serde_json::from_str(&output).unwrap_or(Value::Null),
                    error_flag: row.get::<_, i64>(5)? != 0,
                    timestamp: timestamp
                        .parse()
                        .unwrap_or_else(|_| chrono::Utc::now()),
                })
            })
            .context("failed to replay session events")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to collect session events")?;
        Ok(events)
    }

    /// Events where an agent reported a failure.
    pub fn failed_events(&self, session_id: &str) -> Result<Vec<SessionEvent>> {
        Ok(self
            .replay_session(session_id)?
            .into_iter()
            .filter(|e| e.error_flag)
            .collect())
    }
}
