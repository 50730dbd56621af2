//! Budgeting: income-tier allocation suggestions from the analysis output.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::compute;
use crate::reliability::AgentError;
use crate::security::{ActionType, PrivilegeModel};

use super::Agent;

const DEFAULT_SAVINGS_TARGET: f64 = 20.0;

pub struct BudgetingAgent {
    privileges: PrivilegeModel,
}

impl BudgetingAgent {
    pub fn new(privileges: PrivilegeModel) -> BudgetingAgent {
        BudgetingAgent { privileges }
    }
}

#[async_trait]
impl Agent for BudgetingAgent {
    fn name(&self) -> &'static str {
        "budgeting"
    }

    async fn execute(&self, session_id: &str, input: &Value) -> Result<Value, AgentError> {
        self.privileges
            .validate(self.name(), ActionType::SuggestBudget)?;

        let total_income = input
            .get("total_income")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                AgentError::SchemaValidation(
                    "budgeting requires total_income from analysis".to_string(),
                )
            })?;
        let savings_target = input
            .get("savings_target")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_SAVINGS_TARGET);

        let spend: BTreeMap<String, f64> = input
            .get("category_breakdown")
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_f64().map(|amount| (k.clone(), amount)))
                    .collect()
            })
            .unwrap_or_default();

        let budget = compute::suggest_budget(&spend, total_income, savings_target)?;
        debug!(
            session_id,
            income_level = %budget.income_level,
            savings_target,
            "budget suggested"
        );
        Ok(json!({
            "suggestions": budget.allocations,
            "income_level": budget.income_level,
            "savings_target": savings_target,
            "savings_target_met": budget.savings_target_met,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_suggests_from_analysis_output() {
        let agent = BudgetingAgent::new(PrivilegeModel::new());
        let output = agent
            .execute(
                "s1",
                &json!({
                    "total_income": 5000.0,
                    "category_breakdown": {"Housing": 1500.0, "Food": 150.0},
                }),
            )
            .await
            .unwrap();

        assert_eq!(output["income_level"], json!("medium_income"));
        assert_eq!(output["savings_target"], json!(20.0));
        assert_eq!(output["suggestions"].as_array().unwrap().len(), 8);
        assert_eq!(output["savings_target_met"], json!(true));
    }

    #[tokio::test]
    async fn test_missing_income_is_schema_error() {
        let agent = BudgetingAgent::new(PrivilegeModel::new());
        let err = agent.execute("s1", &json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::SchemaValidation(_)));
    }

    #[tokio::test]
    async fn test_zero_income_is_logic_violation() {
        let agent = BudgetingAgent::new(PrivilegeModel::new());
        let err = agent
            .execute("s1", &json!({"total_income": 0.0}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::LogicViolation(_)));
    }
}
