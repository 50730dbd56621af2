//! Rule-table risk scoring for individual transactions.

use std::collections::BTreeMap;

use crate::domain::Transaction;

const CATEGORY_RISK: &[(&str, f64)] = &[
    ("gambling", 0.9),
    ("cryptocurrency", 0.8),
    ("loan", 0.7),
    ("credit_card", 0.6),
    ("transfer", 0.4),
    ("subscription", 0.3),
    ("shopping", 0.3),
    ("entertainment", 0.2),
    ("utilities", 0.1),
    ("food", 0.1),
    ("transportation", 0.1),
    ("housing", 0.1),
    ("healthcare", 0.1),
    ("income", 0.0),
    ("salary", 0.0),
];

const HIGH_RISK_KEYWORDS: &[&str] = &["gambling", "casino", "lottery", "crypto"];
const DEBT_KEYWORDS: &[&str] = &["loan", "credit", "interest", "financing"];

#[derive(Debug, Clone, PartialEq)]
pub struct RiskScore {
    pub transaction_id: String,
    pub risk_score: f64,
    pub risk_factors: BTreeMap<String, f64>,
}

/// Score a transaction from its category, magnitude, and description
/// keywords. Scores are clamped to [0, 1].
pub fn compute_risk_score(txn: &Transaction) -> RiskScore {
    let mut factors = BTreeMap::new();
    let abs_amount = txn.amount.abs();
    let desc_lower = txn.description.to_lowercase();

    let mut score = 0.0;
    if let Some(category) = &txn.category {
        let category_lower = category.to_lowercase();
        score = CATEGORY_RISK
            .iter()
            .find(|(name, _)| *name == category_lower)
            .map(|(_, risk)| *risk)
            .unwrap_or(0.3);
        factors.insert("category_risk".to_string(), score);
    }

    if abs_amount > 1000.0 {
        let boost = ((abs_amount - 1000.0) / 10_000.0).min(0.3);
        factors.insert("large_transaction".to_string(), boost);
        score += boost;
    }
    if abs_amount > 5000.0 {
        let boost = ((abs_amount - 5000.0) / 25_000.0).min(0.2);
        factors.insert("very_large_transaction".to_string(), boost);
        score += boost;
    }

    if txn.amount < 0.0 {
        for keyword in HIGH_RISK_KEYWORDS {
            if desc_lower.contains(keyword) {
                factors.insert(format!("keyword_{keyword}"), 0.5);
                score = score.max(0.8);
            }
        }
        for keyword in DEBT_KEYWORDS {
            if desc_lower.contains(keyword) {
                factors.insert(format!("keyword_{keyword}"), 0.3);
                score = score.max(0.6);
            }
        }
    }

    RiskScore {
        transaction_id: txn
            .transaction_id
            .clone()
            .unwrap_or_default(),
        risk_score: score.clamp(0.0, 1.0),
        risk_factors: factors,
    }
}
