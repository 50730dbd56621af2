//! Evaluation: financial health score and risk grading.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::reliability::AgentError;
use crate::security::{ActionType, PrivilegeModel};

use super::Agent;

/// Scores the merged analysis/budget output. Starts from 100 and deducts
/// for a weak savings rate, flagged anomalies, and over-budget categories.
pub struct EvaluationAgent {
    privileges: PrivilegeModel,
}

impl EvaluationAgent {
    pub fn new(privileges: PrivilegeModel) -> EvaluationAgent {
        EvaluationAgent { privileges }
    }
}

fn grade(score: f64) -> &'static str {
    if score >= 90.0 {
        "A"
    } else if score >= 75.0 {
        "B"
    } else if score >= 60.0 {
        "C"
    } else if score >= 40.0 {
        "D"
    } else {
        "F"
    }
}

#[async_trait]
impl Agent for EvaluationAgent {
    fn name(&self) -> &'static str {
        "evaluation"
    }

    async fn execute(&self, session_id: &str, input: &Value) -> Result<Value, AgentError> {
        self.privileges
            .validate(self.name(), ActionType::ReadTransactions)?;

        let savings_rate = input
            .get("savings_rate")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                AgentError::SchemaValidation(
                    "evaluation requires savings_rate from analysis".to_string(),
                )
            })?;

        let anomalies = input
            .get("anomalies")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let max_anomaly_risk = anomalies
            .iter()
            .filter_map(|a| a.get("risk_score").and_then(Value::as_f64))
            .fold(0.0, f64::max);

        let over_budget = input
            .get("budget_suggestions")
            .and_then(Value::as_array)
            .map(|suggestions| {
                suggestions
                    .iter()
                    .filter(|s| {
                        let current = s.get("current_spend").and_then(Value::as_f64).unwrap_or(0.0);
                        let suggested = s
                            .get("suggested_budget")
                            .and_then(Value::as_f64)
                            .unwrap_or(f64::MAX);
                        current > suggested
                    })
                    .count()
            })
            .unwrap_or(0);

        let mut deductions = Map::new();
        let savings_penalty = if savings_rate < 0.0 {
            40.0
        } else if savings_rate < 10.0 {
            30.0
        } else if savings_rate < 20.0 {
            15.0
        } else {
            0.0
        };
        if savings_penalty > 0.0 {
            deductions.insert("low_savings_rate".to_string(), json!(savings_penalty));
        }

        let anomaly_penalty = (anomalies.len() as f64 * 10.0).min(30.0);
        if anomaly_penalty > 0.0 {
            deductions.insert("anomalies".to_string(), json!(anomaly_penalty));
        }

        let budget_penalty = (over_budget as f64 * 5.0).min(20.0);
        if budget_penalty > 0.0 {
            deductions.insert("over_budget_categories".to_string(), json!(budget_penalty));
        }

        let health_score = (100.0 - savings_penalty - anomaly_penalty - budget_penalty).max(0.0);
        let risk_level = if max_anomaly_risk > 0.7 {
            "high"
        } else if max_anomaly_risk > 0.4 {
            "medium"
        } else {
            "low"
        };

        debug!(session_id, health_score, risk_level, "evaluation complete");
        Ok(json!({
            "health_score": health_score,
            "grade": grade(health_score),
            "risk_level": risk_level,
            "max_anomaly_risk": max_anomaly_risk,
            "anomaly_count": anomalies.len(),
            "deductions": deductions,
        }))
    }
}
