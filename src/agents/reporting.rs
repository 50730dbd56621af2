//! Reporting: assemble the final report from every prior stage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use crate::llm::LlmClient;
use crate::reliability::AgentError;
use crate::security::{ActionType, PrivilegeModel};

use super::Agent;

pub struct ReportingAgent {
    privileges: PrivilegeModel,
    llm: Arc<dyn LlmClient>,
}

impl ReportingAgent {
    pub fn new(privileges: PrivilegeModel, llm: Arc<dyn LlmClient>) -> ReportingAgent {
        ReportingAgent { privileges, llm }
    }

    fn recommendations(input: &Value) -> Vec<String> {
        let mut recommendations = Vec::new();

        if input.get("savings_target_met").and_then(Value::as_bool) == Some(false) {
            recommendations
                .push("Savings fell short of target; review discretionary spending.".to_string());
        }

        if let Some(suggestions) = input.get("budget_suggestions").and_then(Value::as_array) {
            for suggestion in suggestions {
                let current = suggestion
                    .get("current_spend")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                let suggested = suggestion
                    .get("suggested_budget")
                    .and_then(Value::as_f64)
                    .unwrap_or(f64::MAX);
                if current > suggested {
                    if let Some(category) = suggestion.get("category").and_then(Value::as_str) {
                        recommendations.push(format!(
                            "Reduce {category} spending from ${current:.2} toward ${suggested:.2}."
                        ));
                    }
                }
            }
        }

        let anomaly_count = input
            .get("anomalies")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        if anomaly_count > 0 {
            recommendations.push(format!(
                "Review {anomaly_count} flagged transaction(s) for legitimacy."
            ));
        }

        if recommendations.is_empty() {
            recommendations.push("Finances look healthy; keep the current plan.".to_string());
        }
        recommendations
    }
}

#[async_trait]
impl Agent for ReportingAgent {
    fn name(&self) -> &'static str {
        "reporting"
    }

    async fn execute(&self, session_id: &str, input: &Value) -> Result<Value, AgentError> {
        self.privileges
            .validate(self.name(), ActionType::GenerateReport)?;

        let total_income = input.get("total_income").and_then(Value::as_f64).unwrap_or(0.0);
        let total_expense = input.get("total_expense").and_then(Value::as_f64).unwrap_or(0.0);
        let net_savings = input.get("net_savings").and_then(Value::as_f64).unwrap_or(0.0);
        let savings_rate = input.get("savings_rate").and_then(Value::as_f64).unwrap_or(0.0);
        let grade = input.get("grade").and_then(Value::as_str).unwrap_or("N/A");

        let prompt = format!(
            "Summarize this month in two sentences: income ${total_income:.2}, \
             expenses ${total_expense:.2}, net savings ${net_savings:.2} \
             ({savings_rate:.1}% savings rate), health grade {grade}."
        );
        // Prefer the prose rendering of the user's history; fall back to
        // the raw context when only that is available.
        let context = input
            .get("compressed_context")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| input.get("historical_context").map(Value::to_string));
        let report_text = self.llm.chat(&prompt, context.as_deref()).await?;

        let recommendations = Self::recommendations(input);
        debug!(session_id, recommendation_count = recommendations.len(), "report assembled");
        Ok(json!({
            "report_text": report_text,
            "summary": {
                "total_income": total_income,
                "total_expense": total_expense,
                "net_savings": net_savings,
                "savings_rate": savings_rate,
                "health_grade": grade,
            },
            "recommendations": recommendations,
            "generated_at": Utc::now().to_rfc3339(),
        }))
    }
}
