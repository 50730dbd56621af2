//! Ingestion: validate and normalize raw transaction input.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::Transaction;
use crate::reliability::AgentError;
use crate::security::{ActionType, PrivilegeModel};

use super::Agent;

/// Accepts transactions inline (`transactions` array) or from a JSON file
/// (`file_path`). Every record must carry a description and a numeric
/// amount; missing ids are assigned.
pub struct IngestionAgent {
    privileges: PrivilegeModel,
}

impl IngestionAgent {
    pub fn new(privileges: PrivilegeModel) -> IngestionAgent {
        IngestionAgent { privileges }
    }

    fn load_from_file(&self, path: &str) -> Result<Vec<Value>, AgentError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::CorruptedData(format!("cannot read {path}: {e}")))?;
        let parsed: Value = serde_json::from_str(&content)
            .map_err(|e| AgentError::CorruptedData(format!("invalid JSON in {path}: {e}")))?;
        let items = match parsed {
            Value::Array(items) => items,
            Value::Object(ref obj) => obj
                .get("transactions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(items)
    }
}

#[async_trait]
impl Agent for IngestionAgent {
    fn name(&self) -> &'static str {
        "ingestion"
    }

    async fn execute(&self, session_id: &str, input: &Value) -> Result<Value, AgentError> {
        self.privileges
            .validate(self.name(), ActionType::ReadTransactions)?;

        let (items, source) = if let Some(path) = input.get("file_path").and_then(Value::as_str) {
            (self.load_from_file(path)?, "file")
        } else {
            let inline = input
                .get("transactions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            (inline, "inline")
        };

        if items.is_empty() {
            return Err(AgentError::SchemaValidation(
                "input contains no transactions".to_string(),
            ));
        }

        let mut transactions = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match Transaction::from_value(item) {
                Some(txn) => transactions.push(txn),
                None => {
                    return Err(AgentError::SchemaValidation(format!(
                        "transaction {index} is missing a description or numeric amount"
                    )))
                }
            }
        }

        let count = transactions.len();
        debug!(session_id, count, source, "ingested transactions");
        Ok(json!({
            "transactions": transactions,
            "count": count,
            "source": source,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn agent() -> IngestionAgent {
        IngestionAgent::new(PrivilegeModel::new())
    }

    #[tokio::test]
    async fn test_inline_transactions() {
        let output = agent()
            .execute(
                "s1",
                &json!({"transactions": [
                    {"date": "2025-01-01", "description": "Salary", "amount": 5000.0},
                    {"date": "2025-01-02", "description": "Rent", "amount": -1500.0},
                ]}),
            )
            .await
            .unwrap();
        assert_eq!(output["count"], json!(2));
        assert_eq!(output["source"], json!("inline"));
        // Ids are assigned during normalization.
        assert!(output["transactions"][0]["transaction_id"].is_string());
    }

    #[tokio::test]
    async fn test_empty_input_is_schema_error() {
        let err = agent().execute("s1", &json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::SchemaValidation(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_record_is_schema_error() {
        let err = agent()
            .execute("s1", &json!({"transactions": [{"description": "no amount"}]}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SchemaValidation(_)));
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("txns.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"[{{"date": "2025-01-01", "description": "Salary", "amount": 5000.0}}]"#
        )
        .unwrap();

        let output = agent()
            .execute("s1", &json!({"file_path": path.to_str().unwrap()}))
            .await
            .unwrap();
        assert_eq!(output["count"], json!(1));
        assert_eq!(output["source"], json!("file"));
    }

    #[tokio::test]
    async fn test_unreadable_file_is_corrupted_data() {
        let err = agent()
            .execute("s1", &json!({"file_path": "/nonexistent/txns.json"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::CorruptedData(_)));
    }
}
