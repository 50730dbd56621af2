//! Retrieval: compressed historical context for a user.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::memory::{ContextCompressor, MemoryManager};
use crate::reliability::AgentError;
use crate::security::{ActionType, PrivilegeModel};

use super::Agent;

const HISTORY_MONTHS: usize = 6;

pub struct RetrievalAgent {
    privileges: PrivilegeModel,
    memory: Arc<MemoryManager>,
    compressor: ContextCompressor,
}

impl RetrievalAgent {
    pub fn new(privileges: PrivilegeModel, memory: Arc<MemoryManager>) -> RetrievalAgent {
        RetrievalAgent {
            privileges,
            memory,
            compressor: ContextCompressor::new(),
        }
    }
}

#[async_trait]
impl Agent for RetrievalAgent {
    fn name(&self) -> &'static str {
        "retrieval"
    }

    async fn execute(&self, session_id: &str, input: &Value) -> Result<Value, AgentError> {
        self.privileges
            .validate(self.name(), ActionType::ReadHistory)?;

        let user_id = input.get("user_id").and_then(Value::as_str).ok_or_else(|| {
            AgentError::SchemaValidation("retrieval requires a user_id".to_string())
        })?;

        let summaries = self
            .memory
            .monthly_summaries(user_id, HISTORY_MONTHS)
            .map_err(|e| AgentError::LockContention(e.to_string()))?;

        let months = summaries.len();
        let context = self.compressor.compress(&summaries);
        debug!(session_id, user_id, months, "retrieved historical context");
        match context {
            Some(ctx) => Ok(json!({
                "historical_context": ctx,
                "months": months,
            })),
            None => Ok(json!({
                "historical_context": Value::Null,
                "months": 0,
            })),
        }
    }
}
