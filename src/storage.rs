//! SQLite-backed persistence shared by the reliability managers.
//!
//! One `Database` handle per process, shared via `Arc`. Every table is keyed
//! so concurrent sessions upsert without cross-session interference:
//! checkpoints and session stats by session id, approval requests by request
//! id, and the audit tables (events, retry attempts, circuit breaker events)
//! append-only with duplicate-insert tolerance on their natural keys.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Process-wide database handle. Connection access is serialized; callers
/// hold the lock only for the duration of a single statement batch.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        let conn = Connection::open(path.as_ref()).with_context(|| {
            format!("failed to open database at {}", path.as_ref().display())
        })?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database, used by tests and ephemeral runs.
    pub fn in_memory() -> Result<Database> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another thread panicked mid-statement;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                state TEXT NOT NULL,
                agent_name TEXT NOT NULL,
                input_payload TEXT NOT NULL,
                output_payload TEXT NOT NULL,
                error_flag INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id);

            CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                current_state TEXT NOT NULL,
                completed_agents TEXT NOT NULL,
                partial_outputs TEXT NOT NULL,
                iteration INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                is_complete INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS session_stats (
                session_id TEXT PRIMARY KEY,
                iteration INTEGER NOT NULL DEFAULT 0,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                runtime_seconds REAL NOT NULL DEFAULT 0.0,
                start_time TEXT NOT NULL,
                last_update TEXT NOT NULL,
                termination_reason TEXT
            );

            CREATE TABLE IF NOT EXISTS approval_requests (
                request_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                approval_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                reason TEXT NOT NULL,
                details TEXT,
                requested_at TEXT NOT NULL,
                approved_at TEXT,
                approved_by TEXT,
                approver_comment TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_session_approvals
                ON approval_requests(session_id, status);

            CREATE TABLE IF NOT EXISTS retry_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                agent_name TEXT NOT NULL,
                attempt_number INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                error_type TEXT NOT NULL,
                error_message TEXT,
                delay_used REAL,
                success INTEGER NOT NULL,
                UNIQUE(session_id, agent_name, attempt_number)
            );

            CREATE TABLE IF NOT EXISTS circuit_breaker_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                previous_state TEXT,
                new_state TEXT,
                error_rate REAL,
                UNIQUE(agent_name, timestamp, event_type)
            );

            CREATE TABLE IF NOT EXISTS fallback_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                agent_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                original_error TEXT,
                fallback_type TEXT NOT NULL,
                fallback_executed TEXT,
                success INTEGER NOT NULL,
                UNIQUE(session_id, agent_name, timestamp)
            );

            CREATE TABLE IF NOT EXISTS short_term_state (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                workflow_state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS monthly_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                month TEXT NOT NULL,
                total_income REAL NOT NULL,
                total_expense REAL NOT NULL,
                category_breakdown TEXT NOT NULL,
                anomaly_count INTEGER NOT NULL DEFAULT 0,
                UNIQUE(user_id, month)
            );
            ",
        )
        .context("failed to initialize database schema")?;
        Ok(())
    }
}
