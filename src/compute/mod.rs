//! Pure computation behind the analysis and budgeting agents.
//!
//! - Aggregation: totals, category breakdown, savings rate
//! - Anomaly: IQR outlier detection over expenses
//! - Categorize: keyword categorization of descriptions
//! - Risk: rule-table transaction risk scoring
//! - Budget: income-tier percentage allocation

pub mod aggregation;
pub mod anomaly;
pub mod budget;
pub mod categorize;
pub mod risk;

pub use aggregation::{compute_category_breakdown, compute_savings_rate, compute_totals, Totals};
pub use anomaly::detect_outliers;
pub use categorize::{categorize_description, categorize_transactions};
pub use budget::{suggest_budget, BudgetAllocation, BudgetResult};
pub use risk::{compute_risk_score, RiskScore};
