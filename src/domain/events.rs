//! Rows of the append-only session event log.
//!
//! Every agent execution, transition and failure is recorded; the event log
//! returned by the orchestrator is a replay of these rows in insert order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in a session's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    pub state: String,
    pub agent_name: String,
    pub input_payload: Value,
    pub output_payload: Value,
    pub error_flag: bool,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(
        session_id: impl Into<String>,
        state: impl Into<String>,
        agent_name: impl Into<String>,
        input_payload: Value,
        output_payload: Value,
        error_flag: bool,
    ) -> SessionEvent {
        SessionEvent {
            session_id: session_id.into(),
            state: state.into(),
            agent_name: agent_name.into(),
            input_payload,
            output_payload,
            error_flag,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::new(
            "s1",
            "INGEST",
            "ingestion",
            json!({"file_path": "x.json"}),
            json!({"count": 2}),
            false,
        );
        let json = serde_json::to_string(&event).unwrap();
        let parsed: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.agent_name, "ingestion");
        assert!(!parsed.error_flag);
    }
}
