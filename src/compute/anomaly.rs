//! IQR-based outlier detection over expense magnitudes.

use uuid::Uuid;

use crate::domain::{AnomalyAlert, Transaction};

const IQR_MULTIPLIER: f64 = 1.5;

/// Detect expense outliers using the interquartile range.
///
/// Needs at least four expenses to establish quartiles; returns an empty
/// list otherwise (too little data to call anything anomalous).
pub fn detect_outliers(transactions: &[Transaction]) -> Vec<AnomalyAlert> {
    let expenses: Vec<f64> = transactions
        .iter()
        .filter(|t| t.amount < 0.0)
        .map(|t| t.amount.abs())
        .collect();

    if expenses.len() < 4 {
        return Vec::new();
    }

    let (_, q3, iqr) = quartiles(&expenses);
    if iqr == 0.0 {
        return Vec::new();
    }

    let upper_bound = q3 + IQR_MULTIPLIER * iqr;

    let mut anomalies = Vec::new();
    for txn in transactions {
        if txn.amount < 0.0 {
            let expense = txn.amount.abs();
            if expense > upper_bound {
                let denominator = if upper_bound > 0.0 { upper_bound } else { 1.0 };
                let risk_score = ((expense - upper_bound) / denominator).min(1.0);
                anomalies.push(AnomalyAlert {
                    transaction_id: txn
                        .transaction_id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    reason: format!(
                        "Expense ${:.2} exceeds IQR upper bound ${:.2}",
                        expense, upper_bound
                    ),
                    risk_score,
                });
            }
        }
    }

    anomalies
}

fn quartiles(values: &[f64]) -> (f64, f64, f64) {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let q1 = sorted[n / 4];
    let q3 = sorted[3 * n / 4];
    (q1, q3, q3 - q1)
}
