//! Totals, category breakdown, and savings rate.

use std::collections::BTreeMap;

use crate::domain::Transaction;

/// Income/expense totals. Expenses are reported as positive magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Totals {
    pub total_income: f64,
    pub total_expense: f64,
    pub net_savings: f64,
}

pub fn compute_totals(transactions: &[Transaction]) -> Totals {
    let mut total_income = 0.0;
    let mut total_expense = 0.0;

    for txn in transactions {
        if txn.amount > 0.0 {
            total_income += txn.amount;
        } else {
            total_expense += txn.amount.abs();
        }
    }

    Totals {
        total_income,
        total_expense,
        net_savings: total_income - total_expense,
    }
}

/// Expense totals per category; uncategorized expenses land under
/// "Uncategorized".
pub fn compute_category_breakdown(transactions: &[Transaction]) -> BTreeMap<String, f64> {
    let mut breakdown = BTreeMap::new();

    for txn in transactions {
        if txn.amount < 0.0 {
            let category = txn
                .category
                .clone()
                .unwrap_or_else(|| "Uncategorized".to_string());
            *breakdown.entry(category).or_insert(0.0) += txn.amount.abs();
        }
    }

    breakdown
}

/// Savings rate as a percentage, rounded to two decimals.
/// Zero when there is no income.
pub fn compute_savings_rate(total_income: f64, total_expense: f64) -> f64 {
    if total_income <= 0.0 {
        return 0.0;
    }
    let rate = (total_income - total_expense) / total_income * 100.0;
    (rate * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(description: &str, amount: f64) -> Transaction {
        Transaction {
            date: "2025-01-01".to_string(),
            description: description.to_string(),
            amount,
            category: None,
            transaction_id: None,
        }
    }

    #[test]
    fn test_totals() {
        let txns = vec![txn("Salary", 5000.0), txn("Rent", -1500.0), txn("Grocery", -150.0)];
        let totals = compute_totals(&txns);
        assert_eq!(totals.total_income, 5000.0);
        assert_eq!(totals.total_expense, 1650.0);
        assert_eq!(totals.net_savings, 3350.0);
    }

    #[test]
    fn test_totals_empty() {
        assert_eq!(compute_totals(&[]), Totals::default());
    }

    #[test]
    fn test_savings_rate() {
        assert_eq!(compute_savings_rate(5000.0, 1650.0), 67.0);
        assert_eq!(compute_savings_rate(0.0, 100.0), 0.0);
        assert_eq!(compute_savings_rate(-10.0, 100.0), 0.0);
    }

    #[test]
    fn test_category_breakdown() {
        let txns = vec![
            txn("Rent", -1500.0).with_category("Housing"),
            txn("Grocery", -150.0).with_category("Food"),
            txn("Snacks", -50.0).with_category("Food"),
            txn("Mystery", -25.0),
            txn("Salary", 5000.0).with_category("Income"),
        ];
        let breakdown = compute_category_breakdown(&txns);
        assert_eq!(breakdown["Housing"], 1500.0);
        assert_eq!(breakdown["Food"], 200.0);
        assert_eq!(breakdown["Uncategorized"], 25.0);
        // Income never appears in the expense breakdown.
        assert!(!breakdown.contains_key("Income"));
    }
}
