//! Human-in-the-loop approval requests.
//!
//! The orchestrator files a request when a run crosses a risk threshold and
//! parks the session in `WAITING_APPROVAL`. Requests resolve exactly once:
//! approve, reject, and cancel all go through a single status-checked
//! update, and resolving an already-resolved request is a typed error
//! rather than a silent overwrite.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    HighValueTransaction,
    AnomalyDetected,
    HighRiskTransaction,
    BudgetOverride,
    SystemAction,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalType::HighValueTransaction => "high_value_transaction",
            ApprovalType::AnomalyDetected => "anomaly_detected",
            ApprovalType::HighRiskTransaction => "high_risk_transaction",
            ApprovalType::BudgetOverride => "budget_override",
            ApprovalType::SystemAction => "system_action",
        }
    }

    pub fn parse(s: &str) -> Option<ApprovalType> {
        match s {
            "high_value_transaction" => Some(ApprovalType::HighValueTransaction),
            "anomaly_detected" => Some(ApprovalType::AnomalyDetected),
            "high_risk_transaction" => Some(ApprovalType::HighRiskTransaction),
            "budget_override" => Some(ApprovalType::BudgetOverride),
            "system_action" => Some(ApprovalType::SystemAction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<ApprovalStatus> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "cancelled" => Some(ApprovalStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric gate for one approval type: values strictly above the threshold
/// require a human sign-off. Disabled gates are skipped entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalThreshold {
    pub approval_type: ApprovalType,
    pub threshold: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Built-in gates applied when the config carries none.
pub fn default_thresholds() -> Vec<ApprovalThreshold> {
    vec![
        ApprovalThreshold {
            approval_type: ApprovalType::HighValueTransaction,
            threshold: 500.0,
            enabled: true,
        },
        ApprovalThreshold {
            approval_type: ApprovalType::AnomalyDetected,
            threshold: 0.7,
            enabled: true,
        },
        ApprovalThreshold {
            approval_type: ApprovalType::HighRiskTransaction,
            threshold: 0.7,
            enabled: true,
        },
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub session_id: String,
    pub approval_type: ApprovalType,
    pub status: ApprovalStatus,
    pub reason: String,
    pub details: Option<Value>,
    pub requested_at: String,
    pub approved_at: Option<String>,
    pub approved_by: Option<String>,
    pub approver_comment: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval request not found: {0}")]
    NotFound(String),

    #[error("approval request {request_id} already resolved as {status}")]
    AlreadyResolved {
        request_id: String,
        status: ApprovalStatus,
    },

    #[error("approval storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Files, resolves, and queries approval requests.
pub struct ApprovalManager {
    db: Arc<Database>,
    thresholds: Vec<ApprovalThreshold>,
}

impl ApprovalManager {
    /// `thresholds` from config; the built-in table applies when empty.
    pub fn new(db: Arc<Database>, thresholds: Vec<ApprovalThreshold>) -> ApprovalManager {
        let thresholds = if thresholds.is_empty() {
            default_thresholds()
        } else {
            thresholds
        };
        ApprovalManager { db, thresholds }
    }

    /// Whether `value` crosses the gate for this approval type. Types with
    /// no enabled threshold pass without approval.
    pub fn requires_approval(&self, approval_type: ApprovalType, value: f64) -> bool {
        self.thresholds
            .iter()
            .find(|t| t.approval_type == approval_type && t.enabled)
            .map(|gate| value > gate.threshold)
            .unwrap_or(false)
    }

    /// File a new pending request; returns its id.
    pub fn request_approval(
        &self,
        session_id: &str,
        approval_type: ApprovalType,
        reason: &str,
        details: Option<&Value>,
    ) -> Result<String, ApprovalError> {
        let request_id = Uuid::new_v4().to_string();
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO approval_requests
             (request_id, session_id, approval_type, status, reason, details, requested_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6)",
            rusqlite::params![
                request_id,
                session_id,
                approval_type.as_str(),
                reason,
                details.map(Value::to_string),
                Utc::now().to_rfc3339(),
            ],
        )
        .context("failed to create approval request")?;
        info!(
            session_id,
            request_id = %request_id,
            approval_type = approval_type.as_str(),
            "approval requested"
        );
        Ok(request_id)
    }

    pub fn approve(
        &self,
        request_id: &str,
        approved_by: &str,
        comment: Option<&str>,
    ) -> Result<(), ApprovalError> {
        self.resolve(request_id, ApprovalStatus::Approved, Some(approved_by), comment)
    }

    pub fn reject(
        &self,
        request_id: &str,
        rejected_by: &str,
        comment: Option<&str>,
    ) -> Result<(), ApprovalError> {
        self.resolve(request_id, ApprovalStatus::Rejected, Some(rejected_by), comment)
    }

    /// Withdraw a pending request, e.g. when its session is terminated.
    pub fn cancel(&self, request_id: &str) -> Result<(), ApprovalError> {
        self.resolve(request_id, ApprovalStatus::Cancelled, None, None)
    }

    fn resolve(
        &self,
        request_id: &str,
        new_status: ApprovalStatus,
        resolved_by: Option<&str>,
        comment: Option<&str>,
    ) -> Result<(), ApprovalError> {
        let conn = self.db.conn();
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM approval_requests WHERE request_id = ?1",
                [request_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read approval status")?;

        let current = match current.as_deref().and_then(ApprovalStatus::parse) {
            Some(status) => status,
            None => return Err(ApprovalError::NotFound(request_id.to_string())),
        };
        if current != ApprovalStatus::Pending {
            warn!(request_id, status = %current, "refusing to re-resolve approval");
            return Err(ApprovalError::AlreadyResolved {
                request_id: request_id.to_string(),
                status: current,
            });
        }

        conn.execute(
            "UPDATE approval_requests
             SET status = ?2, approved_at = ?3, approved_by = ?4, approver_comment = ?5
             WHERE request_id = ?1 AND status = 'pending'",
            rusqlite::params![
                request_id,
                new_status.as_str(),
                Utc::now().to_rfc3339(),
                resolved_by,
                comment,
            ],
        )
        .context("failed to resolve approval request")?;
        info!(request_id, status = new_status.as_str(), "approval resolved");
        Ok(())
    }

    pub fn is_approved(&self, request_id: &str) -> Result<bool, ApprovalError> {
        Ok(self.get_request(request_id)?.status == ApprovalStatus::Approved)
    }

    pub fn get_request(&self, request_id: &str) -> Result<ApprovalRequest, ApprovalError> {
        let conn = self.db.conn();
        let row = conn
            .query_row(
                "SELECT request_id, session_id, approval_type, status, reason, details,
                        requested_at, approved_at, approved_by, approver_comment
                 FROM approval_requests WHERE request_id = ?1",
                [request_id],
                row_to_request,
            )
            .optional()
            .context("failed to load approval request")?;
        row.ok_or_else(|| ApprovalError::NotFound(request_id.to_string()))
    }

    /// Pending requests for a session, oldest first.
    pub fn pending_requests(&self, session_id: &str) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(
                "SELECT request_id, session_id, approval_type, status, reason, details,
                        requested_at, approved_at, approved_by, approver_comment
                 FROM approval_requests
                 WHERE session_id = ?1 AND status = 'pending'
                 ORDER BY requested_at ASC",
            )
            .context("failed to query pending approvals")?;
        let requests = stmt
            .query_map([session_id], row_to_request)
            .context("failed to read pending approvals")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to collect pending approvals")?;
        Ok(requests)
    }

    /// Every request filed for a session, oldest first, regardless of status.
    pub fn session_requests(&self, session_id: &str) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(
                "SELECT request_id, session_id, approval_type, status, reason, details,
                        requested_at, approved_at, approved_by, approver_comment
                 FROM approval_requests
                 WHERE session_id = ?1
                 ORDER BY requested_at ASC",
            )
            .context("failed to query session approvals")?;
        let requests = stmt
            .query_map([session_id], row_to_request)
            .context("failed to read session approvals")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to collect session approvals")?;
        Ok(requests)
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalRequest> {
    let approval_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let details: Option<String> = row.get(5)?;
    Ok(ApprovalRequest {
        request_id: row.get(0)?,
        session_id: row.get(1)?,
        approval_type: ApprovalType::parse(&approval_type)
            .unwrap_or(ApprovalType::SystemAction),
        status: ApprovalStatus::parse(&status).unwrap_or(ApprovalStatus::Pending),
        reason: row.get(4)?,
        details: details.and_then(|d| serde_json::from_str(&d).ok()),
        requested_at: row.get(6)?,
        approved_at: row.get(7)?,
        approved_by: row.get(8)?,
        approver_comment: row.get(9)?,
    })
}
