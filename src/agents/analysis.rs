//! Analysis: totals, savings rate, category breakdown, anomalies.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::compute;
use crate::domain::transactions_from_input;
use crate::reliability::AgentError;
use crate::security::{ActionType, PrivilegeModel};

use super::Agent;

pub struct AnalysisAgent {
    privileges: PrivilegeModel,
}

impl AnalysisAgent {
    pub fn new(privileges: PrivilegeModel) -> AnalysisAgent {
        AnalysisAgent { privileges }
    }
}

#[async_trait]
impl Agent for AnalysisAgent {
    fn name(&self) -> &'static str {
        "analysis"
    }

    async fn execute(&self, session_id: &str, input: &Value) -> Result<Value, AgentError> {
        self.privileges
            .validate(self.name(), ActionType::ReadTransactions)?;

        let transactions = transactions_from_input(input);
        if transactions.is_empty() {
            return Err(AgentError::SchemaValidation(
                "analysis requires a transactions array".to_string(),
            ));
        }

        let totals = compute::compute_totals(&transactions);
        let savings_rate =
            compute::compute_savings_rate(totals.total_income, totals.total_expense);
        let breakdown = compute::compute_category_breakdown(&transactions);
        let anomalies = compute::detect_outliers(&transactions);

        // Per-transaction risk, reported only for the flagged ones plus any
        // standalone high-risk transactions.
        let risk_scores: Vec<Value> = transactions
            .iter()
            .map(compute::compute_risk_score)
            .filter(|score| score.risk_score >= 0.5)
            .map(|score| {
                json!({
                    "transaction_id": score.transaction_id,
                    "risk_score": score.risk_score,
                    "risk_factors": score.risk_factors,
                })
            })
            .collect();

        debug!(
            session_id,
            total_income = totals.total_income,
            total_expense = totals.total_expense,
            anomaly_count = anomalies.len(),
            "analysis complete"
        );
        Ok(json!({
            "total_income": totals.total_income,
            "total_expense": totals.total_expense,
            "net_savings": totals.net_savings,
            "savings_rate": savings_rate,
            "category_breakdown": breakdown,
            "anomalies": anomalies,
            "high_risk_transactions": risk_scores,
            "transactions": transactions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_analysis() {
        let agent = AnalysisAgent::new(PrivilegeModel::new());
        let output = agent
            .execute(
                "s1",
                &json!({"transactions": [
                    {"date": "2025-01-01", "description": "Salary", "amount": 5000.0, "category": "Income"},
                    {"date": "2025-01-02", "description": "Rent", "amount": -1500.0, "category": "Housing"},
                    {"date": "2025-01-03", "description": "Grocery", "amount": -150.0, "category": "Food"},
                ]}),
            )
            .await
            .unwrap();

        assert_eq!(output["total_income"], json!(5000.0));
        assert_eq!(output["total_expense"], json!(1650.0));
        assert_eq!(output["net_savings"], json!(3350.0));
        assert_eq!(output["savings_rate"], json!(67.0));
        assert_eq!(output["category_breakdown"]["Housing"], json!(1500.0));
        // Three transactions are too few for outlier detection.
        assert!(output["anomalies"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flags_outlier_expense() {
        let agent = AnalysisAgent::new(PrivilegeModel::new());
        let mut items: Vec<Value> = (1..=8)
            .map(|i| {
                json!({"date": "2025-01-01", "description": "Grocery", "amount": -(i as f64 * 10.0)})
            })
            .collect();
        items.push(json!({
            "date": "2025-01-09", "description": "Wire", "amount": -10_000.0,
            "transaction_id": "big-one",
        }));

        let output = agent
            .execute("s1", &json!({"transactions": items}))
            .await
            .unwrap();
        let anomalies = output["anomalies"].as_array().unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0]["transaction_id"], json!("big-one"));
    }

    #[tokio::test]
    async fn test_empty_input_is_schema_error() {
        let agent = AnalysisAgent::new(PrivilegeModel::new());
        let err = agent
            .execute("s1", &json!({"transactions": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SchemaValidation(_)));
    }
}
