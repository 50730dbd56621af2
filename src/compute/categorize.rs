//! Keyword categorization of transaction descriptions.
//!
//! Shared by the categorization agent and its rule-based fallback so
//! degraded mode produces the same categories as a healthy run.

use crate::domain::Transaction;

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("Income", &["salary", "payroll", "paycheck", "deposit", "refund", "dividend"]),
    ("Housing", &["rent", "mortgage", "landlord", "hoa"]),
    ("Food", &["grocery", "restaurant", "cafe", "coffee", "doordash", "uber eats", "food"]),
    ("Transportation", &["uber", "lyft", "gas", "fuel", "parking", "transit", "metro"]),
    ("Utilities", &["electric", "water", "internet", "phone", "utility", "cable"]),
    ("Healthcare", &["pharmacy", "doctor", "clinic", "dental", "hospital", "insurance"]),
    ("Entertainment", &["netflix", "spotify", "cinema", "movie", "game", "concert"]),
    ("Shopping", &["amazon", "target", "walmart", "store", "mall"]),
];

/// Categorize a description by keyword lookup. Unknown descriptions map to
/// "Other"; positive amounts always map to "Income".
pub fn categorize_description(description: &str, amount: f64) -> &'static str {
    if amount > 0.0 {
        return "Income";
    }
    let lower = description.to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return category;
        }
    }
    "Other"
}

/// Fill in missing categories in place; existing categories are kept.
pub fn categorize_transactions(transactions: &mut [Transaction]) {
    for txn in transactions {
        if txn.category.is_none() {
            txn.category = Some(categorize_description(&txn.description, txn.amount).to_string());
        }
    }
}
