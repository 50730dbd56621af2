//! Session memory and historical context.
//!
//! Short-term state tracks where each live session sits in the workflow.
//! Long-term memory is a set of monthly summaries per user; the compressor
//! squeezes those into a compact context block small enough to hand to an
//! LLM prompt without replaying the raw event log.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use crate::domain::WorkflowState;
use crate::storage::Database;

/// One month of aggregated activity for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySummary {
    pub user_id: String,
    /// `YYYY-MM`.
    pub month: String,
    pub total_income: f64,
    pub total_expense: f64,
    pub category_breakdown: BTreeMap<String, f64>,
    pub anomaly_count: u32,
}

impl MonthlySummary {
    pub fn net_savings(&self) -> f64 {
        self.total_income - self.total_expense
    }
}

/// Short- and long-term memory over the shared database.
pub struct MemoryManager {
    db: Arc<Database>,
}

impl MemoryManager {
    pub fn new(db: Arc<Database>) -> MemoryManager {
        MemoryManager { db }
    }

    /// Record where a session currently sits in the workflow.
    pub fn update_short_term_state(
        &self,
        session_id: &str,
        user_id: &str,
        state: WorkflowState,
    ) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO short_term_state (session_id, user_id, workflow_state, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                user_id = excluded.user_id,
                workflow_state = excluded.workflow_state,
                updated_at = excluded.updated_at",
            rusqlite::params![session_id, user_id, state.as_str(), Utc::now().to_rfc3339()],
        )
        .context("failed to update short-term state")?;
        Ok(())
    }

    pub fn short_term_state(&self, session_id: &str) -> Result<Option<WorkflowState>> {
        let conn = self.db.conn();
        let state: Option<String> = conn
            .query_row(
                "SELECT workflow_state FROM short_term_state WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read short-term state")?;
        Ok(state.as_deref().and_then(WorkflowState::parse))
    }

    /// Upsert a user's summary for one month.
    pub fn save_monthly_summary(&self, summary: &MonthlySummary) -> Result<()> {
        let breakdown = serde_json::to_string(&summary.category_breakdown)
            .context("failed to serialize category breakdown")?;
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO monthly_summaries
             (user_id, month, total_income, total_expense, category_breakdown, anomaly_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, month) DO UPDATE SET
                total_income = excluded.total_income,
                total_expense = excluded.total_expense,
                category_breakdown = excluded.category_breakdown,
                anomaly_count = excluded.anomaly_count",
            rusqlite::params![
                summary.user_id,
                summary.month,
                summary.total_income,
                summary.total_expense,
                breakdown,
                summary.anomaly_count,
            ],
        )
        .context("failed to save monthly summary")?;
        Ok(())
    }

    /// Most recent summaries first, capped at `limit`.
    pub fn monthly_summaries(&self, user_id: &str, limit: usize) -> Result<Vec<MonthlySummary>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(
                "SELECT user_id, month, total_income, total_expense, category_breakdown,
                        anomaly_count
                 FROM monthly_summaries WHERE user_id = ?1
                 ORDER BY month DESC LIMIT ?2",
            )
            .context("failed to query monthly summaries")?;
        let summaries = stmt
            .query_map(rusqlite::params![user_id, limit as i64], |row| {
                let breakdown: String = row.get(4)?;
                Ok(MonthlySummary {
                    user_id: row.get(0)?,
                    month: row.get(1)?,
                    total_income: row.get(2)?,
                    total_expense: row.get(3)?,
                    category_breakdown: serde_json::from_str(&breakdown).unwrap_or_default(),
                    anomaly_count: row.get(5)?,
                })
            })
            .context("failed to read monthly summaries")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to collect monthly summaries")?;
        Ok(summaries)
    }
}

/// Multi-month history boiled down to a prompt-sized block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedContext {
    pub avg_income: f64,
    pub avg_expense: f64,
    /// Top categories by average spend, largest first, at most five.
    pub top_categories: Vec<(String, f64)>,
    /// "improving", "declining", or "stable".
    pub savings_trend: String,
    pub risk_flags_count: u32,
    /// `"<first month> to <last month>"`.
    pub period: String,
    pub compressed_at: String,
}

impl CompressedContext {
    /// Render as a short prose block for an LLM prompt.
    pub fn to_llm_prompt(&self) -> String {
        let categories = self
            .top_categories
            .iter()
            .map(|(name, amount)| format!("{name} (${amount:.0})"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Historical context ({period}): average income ${income:.2}, average \
             expenses ${expense:.2}, savings trend {trend}. Top spending: {categories}. \
             {flags} anomaly flag(s) on record.",
            period = self.period,
            income = self.avg_income,
            expense = self.avg_expense,
            trend = self.savings_trend,
            categories = categories,
            flags = self.risk_flags_count,
        )
    }
}

const TOP_CATEGORY_LIMIT: usize = 5;

/// Compresses monthly summaries into a `CompressedContext`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextCompressor;

impl ContextCompressor {
    pub fn new() -> ContextCompressor {
        ContextCompressor
    }

    /// Returns `None` when there is no history to compress.
    pub fn compress(&self, summaries: &[MonthlySummary]) -> Option<CompressedContext> {
        if summaries.is_empty() {
            return None;
        }

        let n = summaries.len() as f64;
        let avg_income = summaries.iter().map(|s| s.total_income).sum::<f64>() / n;
        let avg_expense = summaries.iter().map(|s| s.total_expense).sum::<f64>() / n;

        let mut category_totals: BTreeMap<String, f64> = BTreeMap::new();
        for summary in summaries {
            for (category, amount) in &summary.category_breakdown {
                *category_totals.entry(category.clone()).or_insert(0.0) += amount;
            }
        }
        let mut top_categories: Vec<(String, f64)> = category_totals
            .into_iter()
            .map(|(name, total)| (name, total / n))
            .collect();
        top_categories.sort_by(|a, b| b.1.total_cmp(&a.1));
        top_categories.truncate(TOP_CATEGORY_LIMIT);

        // Summaries arrive newest first; compare the oldest and newest
        // months to call the trend.
        let mut chronological: Vec<&MonthlySummary> = summaries.iter().collect();
        chronological.sort_by(|a, b| a.month.cmp(&b.month));
        let first = chronological[0].net_savings();
        let last = chronological[chronological.len() - 1].net_savings();
        let savings_trend = if chronological.len() < 2 || (last - first).abs() < 1.0 {
            "stable"
        } else if last > first {
            "improving"
        } else {
            "declining"
        };

        let period = format!(
            "{} to {}",
            chronological[0].month,
            chronological[chronological.len() - 1].month
        );
        let risk_flags_count = summaries.iter().map(|s| s.anomaly_count).sum();

        Some(CompressedContext {
            avg_income,
            avg_expense,
            top_categories,
            savings_trend: savings_trend.to_string(),
            risk_flags_count,
            period,
            compressed_at: Utc::now().to_rfc3339(),
        })
    }
}
