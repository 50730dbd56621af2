//! Income-tier budget allocation.
//!
//! Three tiers (low/medium/high income) each carry a fixed percentage table;
//! suggestions compare current category spend against the allocation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::reliability::AgentError;

const LOW_INCOME_THRESHOLD: f64 = 3000.0;
const MEDIUM_INCOME_THRESHOLD: f64 = 7000.0;

const LOW_INCOME_RULES: &[(&str, f64)] = &[
    ("Housing", 0.30),
    ("Food", 0.20),
    ("Transportation", 0.15),
    ("Utilities", 0.10),
    ("Healthcare", 0.05),
    ("Entertainment", 0.05),
    ("Savings", 0.10),
    ("Other", 0.05),
];

const MEDIUM_INCOME_RULES: &[(&str, f64)] = &[
    ("Housing", 0.28),
    ("Food", 0.18),
    ("Transportation", 0.12),
    ("Utilities", 0.08),
    ("Healthcare", 0.05),
    ("Entertainment", 0.08),
    ("Savings", 0.15),
    ("Other", 0.06),
];

const HIGH_INCOME_RULES: &[(&str, f64)] = &[
    ("Housing", 0.25),
    ("Food", 0.15),
    ("Transportation", 0.10),
    ("Utilities", 0.06),
    ("Healthcare", 0.05),
    ("Entertainment", 0.10),
    ("Savings", 0.20),
    ("Other", 0.09),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub category: String,
    pub suggested_budget: f64,
    pub current_spend: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetResult {
    pub allocations: Vec<BudgetAllocation>,
    pub income_level: String,
    pub savings_target_met: bool,
}

fn income_level(total_income: f64) -> (&'static str, &'static [(&'static str, f64)]) {
    if total_income < LOW_INCOME_THRESHOLD {
        ("low_income", LOW_INCOME_RULES)
    } else if total_income < MEDIUM_INCOME_THRESHOLD {
        ("medium_income", MEDIUM_INCOME_RULES)
    } else {
        ("high_income", HIGH_INCOME_RULES)
    }
}

/// Suggest budget allocations for the income tier and savings target.
///
/// Non-positive income and out-of-range savings targets are business-logic
/// violations (non-retryable).
pub fn suggest_budget(
    category_spend: &BTreeMap<String, f64>,
    total_income: f64,
    savings_target: f64,
) -> Result<BudgetResult, AgentError> {
    if total_income <= 0.0 {
        return Err(AgentError::LogicViolation(
            "total income must be positive for budgeting".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&savings_target) {
        return Err(AgentError::LogicViolation(
            "savings target must be between 0 and 100".to_string(),
        ));
    }

    let (level, rules) = income_level(total_income);
    let target_savings = total_income * (savings_target / 100.0);
    let current_savings = total_income - category_spend.values().sum::<f64>();
    let savings_target_met = current_savings >= target_savings;

    let mut allocations = Vec::with_capacity(rules.len());
    for (category, percentage) in rules {
        let suggested = total_income * percentage;
        let current = category_spend.get(*category).copied().unwrap_or(0.0);

        let reasoning = if *category == "Savings" {
            format!("Target savings of {savings_target}% = ${target_savings:.2}")
        } else if current > suggested {
            format!("Current ${current:.2} exceeds suggested ${suggested:.2}. Consider reducing.")
        } else if current < suggested * 0.5 {
            format!("Current ${current:.2} is well below suggested ${suggested:.2}")
        } else {
            format!(
                "Within recommended range (${:.2} - ${:.2})",
                suggested * 0.8,
                suggested * 1.2
            )
        };

        allocations.push(BudgetAllocation {
            category: category.to_string(),
            suggested_budget: (suggested * 100.0).round() / 100.0,
            current_spend: current,
            reasoning,
        });
    }

    Ok(BudgetResult {
        allocations,
        income_level: level.to_string(),
        savings_target_met,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_income_tiers() {
        assert_eq!(income_level(2000.0).0, "low_income");
        assert_eq!(income_level(5000.0).0, "medium_income");
        assert_eq!(income_level(9000.0).0, "high_income");
    }

    #[test]
    fn test_medium_income_allocation() {
        let mut spend = BTreeMap::new();
        spend.insert("Housing".to_string(), 1500.0);
        spend.insert("Food".to_string(), 150.0);

        let result = suggest_budget(&spend, 5000.0, 20.0).unwrap();
        assert_eq!(result.income_level, "medium_income");
        assert_eq!(result.allocations.len(), 8);

        let housing = result
            .allocations
            .iter()
            .find(|a| a.category == "Housing")
            .unwrap();
        assert_eq!(housing.suggested_budget, 1400.0);
        assert!(housing.reasoning.contains("exceeds"));

        // Spent 1650 of 5000, savings 3350 >= target 1000.
        assert!(result.savings_target_met);
    }

    #[test]
    fn test_rejects_non_positive_income() {
        let err = suggest_budget(&BTreeMap::new(), 0.0, 20.0).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rejects_bad_savings_target() {
        assert!(suggest_budget(&BTreeMap::new(), 1000.0, 150.0).is_err());
    }
}
