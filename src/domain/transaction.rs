//! Transaction records and anomaly alerts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single financial transaction. Positive amounts are income,
/// negative amounts are expenses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: String,
    pub description: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl Transaction {
    /// Parse a transaction from a JSON object, assigning a fresh id when
    /// the input carries none.
    pub fn from_value(value: &Value) -> Option<Transaction> {
        let obj = value.as_object()?;
        let date = obj.get("date").and_then(Value::as_str).unwrap_or("").to_string();
        let description = obj.get("description").and_then(Value::as_str)?.to_string();
        let amount = obj.get("amount").and_then(Value::as_f64)?;
        let category = obj
            .get("category")
            .and_then(Value::as_str)
            .map(str::to_string);
        let transaction_id = obj
            .get("transaction_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(Uuid::new_v4().to_string()));
        Some(Transaction {
            date,
            description,
            amount,
            category,
            transaction_id,
        })
    }

    pub fn is_expense(&self) -> bool {
        self.amount < 0.0
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Transaction {
        self.category = Some(category.into());
        self
    }
}

/// An anomalous transaction flagged during analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub transaction_id: String,
    pub reason: String,
    pub risk_score: f64,
}

/// Decode a `transactions` array out of an agent input payload.
pub fn transactions_from_input(input: &Value) -> Vec<Transaction> {
    input
        .get("transactions")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Transaction::from_value).collect())
        .unwrap_or_default()
}
