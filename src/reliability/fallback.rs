//! Deterministic substitute outputs for agents that exhausted retries.
//!
//! Fallbacks never fail: a handler produces a degraded-but-usable payload
//! from whatever input the agent would have received, wrapped in an envelope
//! that marks the result as degraded. A handler that panics is caught; the
//! envelope then carries an error payload and the audit row records the
//! failed invocation. Custom handlers can be registered per
//! `(agent, fallback type)`; each type also carries a built-in default.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::compute;
use crate::domain::transactions_from_input;
use crate::storage::Database;

const MAX_ERROR_LEN: usize = 500;
const MAX_RESULT_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackType {
    /// Keyword rules instead of model output.
    RuleBased,
    /// Fixed-percentage computation instead of tailored advice.
    Deterministic,
    /// Last known good value, when one exists.
    Cached,
    /// Structurally valid zeros.
    Minimal,
}

impl FallbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackType::RuleBased => "rule_based",
            FallbackType::Deterministic => "deterministic",
            FallbackType::Cached => "cached",
            FallbackType::Minimal => "minimal",
        }
    }
}

/// One row of the fallback audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackEvent {
    pub agent_name: String,
    pub timestamp: String,
    pub original_error: String,
    pub fallback_type: String,
    pub success: bool,
}

type Handler = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// Routes failed agents to substitute handlers and audits every invocation.
pub struct FallbackManager {
    db: Arc<Database>,
    handlers: HashMap<(String, FallbackType), Handler>,
}

impl FallbackManager {
    pub fn new(db: Arc<Database>) -> FallbackManager {
        FallbackManager {
            db,
            handlers: HashMap::new(),
        }
    }

    /// Register a custom handler for one agent and fallback type.
    pub fn register(
        &mut self,
        agent_name: impl Into<String>,
        fallback_type: FallbackType,
        handler: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) {
        self.handlers
            .insert((agent_name.into(), fallback_type), Box::new(handler));
    }

    /// Produce a degraded result for a failed agent. Never fails: a handler
    /// panic is converted into an error payload inside the envelope.
    pub fn execute_fallback(
        &self,
        session_id: &str,
        agent_name: &str,
        fallback_type: FallbackType,
        input: &Value,
        original_error: &str,
    ) -> Value {
        let invoked = match self
            .handlers
            .get(&(agent_name.to_string(), fallback_type))
        {
            Some(handler) => catch_unwind(AssertUnwindSafe(|| handler(input))),
            None => catch_unwind(AssertUnwindSafe(|| default_handler(fallback_type, input))),
        };

        let (result, handler_ok) = match invoked {
            Ok(value) => (value, true),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(agent = agent_name, reason = %reason, "fallback handler panicked");
                (json!({"error": reason}), false)
            }
        };

        self.log_event(
            session_id,
            agent_name,
            fallback_type,
            original_error,
            &result,
            handler_ok,
        );

        json!({
            "fallback_type": fallback_type.as_str(),
            "fallback_result": result,
            "degraded_mode": true,
            "fallback_reason": truncate(original_error, MAX_ERROR_LEN),
        })
    }

    /// Fallback invocations for a session, oldest first.
    pub fn fallback_history(&self, session_id: &str) -> Vec<FallbackEvent> {
        let conn = self.db.conn();
        let mut stmt = match conn.prepare(
            "SELECT agent_name, timestamp, original_error, fallback_type, success
             FROM fallback_events WHERE session_id = ?1 ORDER BY id ASC",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!(error = %e, "failed to query fallback history");
                return Vec::new();
            }
        };

        let rows = stmt.query_map([session_id], |row| {
            Ok(FallbackEvent {
                agent_name: row.get(0)?,
                timestamp: row.get(1)?,
                original_error: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                fallback_type: row.get(3)?,
                success: row.get::<_, i64>(4)? != 0,
            })
        });

        match rows {
            Ok(rows) => rows.filter_map(Result::ok).collect(),
            Err(e) => {
                warn!(error = %e, "failed to read fallback history");
                Vec::new()
            }
        }
    }

    fn log_event(
        &self,
        session_id: &str,
        agent_name: &str,
        fallback_type: FallbackType,
        original_error: &str,
        result: &Value,
        success: bool,
    ) {
        let conn = self.db.conn();
        let outcome = conn.execute(
            "INSERT OR IGNORE INTO fallback_events
             (session_id, agent_name, timestamp, original_error, fallback_type, fallback_executed, success)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                session_id,
                agent_name,
                Utc::now().to_rfc3339(),
                truncate(original_error, MAX_ERROR_LEN),
                fallback_type.as_str(),
                truncate(&result.to_string(), MAX_RESULT_LEN),
                success,
            ],
        );
        if let Err(e) = outcome {
            warn!(error = %e, agent = agent_name, "failed to log fallback event");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "fallback handler panicked".to_string()
    }
}

fn default_handler(fallback_type: FallbackType, input: &Value) -> Value {
    match fallback_type {
        FallbackType::RuleBased => rule_based_categorization(input),
        FallbackType::Deterministic => deterministic_budget(input),
        FallbackType::Cached => cached_result(input),
        FallbackType::Minimal => minimal_result(),
    }
}

fn rule_based_categorization(input: &Value) -> Value {
    let mut transactions = transactions_from_input(input);
    compute::categorize_transactions(&mut transactions);
    let count = transactions.len();
    json!({
        "transactions": transactions,
        "categorized_count": count,
        "method": "keyword_rules",
    })
}

fn deterministic_budget(input: &Value) -> Value {
    let transactions = transactions_from_input(input);
    let total_income = input
        .get("total_income")
        .and_then(Value::as_f64)
        .unwrap_or_else(|| compute::compute_totals(&transactions).total_income);

    let spend = match input.get("category_breakdown").and_then(Value::as_object) {
        Some(obj) => obj
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|amount| (k.clone(), amount)))
            .collect(),
        None => compute::compute_category_breakdown(&transactions),
    };

    match compute::suggest_budget(&spend, total_income, 20.0) {
        Ok(budget) => json!({
            "allocations": budget.allocations,
            "income_level": budget.income_level,
            "savings_target_met": budget.savings_target_met,
            "method": "fixed_percentage",
        }),
        Err(_) => json!({
            "allocations": [],
            "income_level": "unknown",
            "method": "fixed_percentage",
        }),
    }
}

fn cached_result(input: &Value) -> Value {
    // No live cache to consult here; surface any historical context already
    // in the payload, otherwise an empty one.
    let historical = input
        .get("historical_context")
        .cloned()
        .unwrap_or_else(|| json!({"months": []}));
    json!({
        "historical_context": historical,
        "cache_hit": input.get("historical_context").is_some(),
    })
}

fn minimal_result() -> Value {
    json!({
        "total_income": 0.0,
        "total_expense": 0.0,
        "net_savings": 0.0,
        "anomalies": [],
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
