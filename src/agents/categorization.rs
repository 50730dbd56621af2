//! Categorization: keyword rules over transaction descriptions.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::compute;
use crate::domain::transactions_from_input;
use crate::reliability::AgentError;
use crate::security::{ActionType, PrivilegeModel};

use super::Agent;

/// Fills in missing categories from the shared keyword table. Categories
/// already present on a transaction are kept.
pub struct CategorizationAgent {
    privileges: PrivilegeModel,
}

impl CategorizationAgent {
    pub fn new(privileges: PrivilegeModel) -> CategorizationAgent {
        CategorizationAgent { privileges }
    }
}

#[async_trait]
impl Agent for CategorizationAgent {
    fn name(&self) -> &'static str {
        "categorization"
    }

    async fn execute(&self, session_id: &str, input: &Value) -> Result<Value, AgentError> {
        self.privileges
            .validate(self.name(), ActionType::ReadTransactions)?;

        let mut transactions = transactions_from_input(input);
        if transactions.is_empty() {
            return Err(AgentError::SchemaValidation(
                "categorization requires a transactions array".to_string(),
            ));
        }

        compute::categorize_transactions(&mut transactions);
        let count = transactions.len();
        debug!(session_id, count, "categorized transactions");
        Ok(json!({
            "transactions": transactions,
            "categorized_count": count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_categorizes_by_keyword() {
        let agent = CategorizationAgent::new(PrivilegeModel::new());
        let output = agent
            .execute(
                "s1",
                &json!({"transactions": [
                    {"date": "2025-01-01", "description": "Salary", "amount": 5000.0},
                    {"date": "2025-01-02", "description": "Monthly Rent", "amount": -1500.0},
                    {"date": "2025-01-03", "description": "Grocery Store", "amount": -150.0},
                ]}),
            )
            .await
            .unwrap();

        let txns = output["transactions"].as_array().unwrap();
        assert_eq!(txns[0]["category"], json!("Income"));
        assert_eq!(txns[1]["category"], json!("Housing"));
        assert_eq!(txns[2]["category"], json!("Food"));
        assert_eq!(output["categorized_count"], json!(3));
    }

    #[tokio::test]
    async fn test_missing_transactions_is_schema_error() {
        let agent = CategorizationAgent::new(PrivilegeModel::new());
        let err = agent.execute("s1", &json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::SchemaValidation(_)));
    }
}
