//! Per-session context accumulated across pipeline stages.
//!
//! Each stage's output lands in a named field; `last_input` is what the
//! next stage receives (the previous output verbatim, or merged with prior
//! analysis for the later stages).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Strongly typed state bag for one workflow session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub ingest_output: Option<Value>,
    pub categorize_output: Option<Value>,
    pub analysis: Option<Value>,
    pub budget: Option<Value>,
    pub evaluation: Option<Value>,
    pub report: Option<Value>,
    pub refine_output: Option<Value>,
    pub historical_context: Option<Value>,
    pub compressed_context: Option<String>,
    /// Input handed to the next agent.
    pub last_input: Option<Value>,
}

impl SessionContext {
    pub fn new() -> SessionContext {
        SessionContext::default()
    }

    /// Anomalies detected during analysis, used for approval gating.
    pub fn anomalies(&self) -> Vec<Value> {
        self.analysis
            .as_ref()
            .and_then(|a| a.get("anomalies"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Merge the budget output with the analysis output (budget keys win
    /// over clashes, analysis fills the rest), plus the raw suggestion list.
    pub fn merged_budget_input(&self) -> Value {
        let mut merged = Map::new();
        if let Some(Value::Object(analysis)) = &self.analysis {
            merged.extend(analysis.clone());
        }
        if let Some(Value::Object(budget)) = &self.budget {
            merged.extend(budget.clone());
        }
        let suggestions = self
            .budget
            .as_ref()
            .and_then(|b| b.get("suggestions"))
            .cloned()
            .unwrap_or_else(|| json!([]));
        merged.insert("budget_suggestions".to_string(), suggestions);
        Value::Object(merged)
    }

    /// Per-stage outputs keyed by agent name, for checkpointing.
    pub fn partial_outputs(&self) -> BTreeMap<String, Value> {
        let mut outputs = BTreeMap::new();
        let fields = [
            ("ingestion", &self.ingest_output),
            ("categorization", &self.categorize_output),
            ("analysis", &self.analysis),
            ("budgeting", &self.budget),
            ("evaluation", &self.evaluation),
            ("reporting", &self.report),
            ("conversation", &self.refine_output),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                outputs.insert(name.to_string(), v.clone());
            }
        }
        outputs
    }

    /// Rebuild a context from checkpointed per-stage outputs.
    pub fn from_partial_outputs(outputs: &BTreeMap<String, Value>) -> SessionContext {
        let mut ctx = SessionContext::new();
        for (name, value) in outputs {
            match name.as_str() {
                "ingestion" => ctx.ingest_output = Some(value.clone()),
                "categorization" => ctx.categorize_output = Some(value.clone()),
                "analysis" => ctx.analysis = Some(value.clone()),
                "budgeting" => ctx.budget = Some(value.clone()),
                "evaluation" => ctx.evaluation = Some(value.clone()),
                "reporting" => ctx.report = Some(value.clone()),
                "conversation" => ctx.refine_output = Some(value.clone()),
                _ => {}
            }
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_budget_input() {
        let mut ctx = SessionContext::new();
        ctx.analysis = Some(json!({"total_income": 5000.0, "savings_rate": 67.0}));
        ctx.budget = Some(json!({"suggestions": [{"category": "Food"}], "income_level": "medium_income"}));

        let merged = ctx.merged_budget_input();
        assert_eq!(merged["total_income"], json!(5000.0));
        assert_eq!(merged["income_level"], json!("medium_income"));
        assert_eq!(merged["budget_suggestions"][0]["category"], json!("Food"));
    }

    #[test]
    fn test_partial_outputs_round_trip() {
        let mut ctx = SessionContext::new();
        ctx.ingest_output = Some(json!({"count": 3}));
        ctx.analysis = Some(json!({"total_income": 5000.0}));

        let outputs = ctx.partial_outputs();
        assert_eq!(outputs.len(), 2);

        let rebuilt = SessionContext::from_partial_outputs(&outputs);
        assert_eq!(rebuilt.ingest_output, ctx.ingest_output);
        assert_eq!(rebuilt.analysis, ctx.analysis);
        assert!(rebuilt.budget.is_none());
    }

    #[test]
    fn test_anomalies_empty_without_analysis() {
        assert!(SessionContext::new().anomalies().is_empty());
    }
}
