//! Workflow states and the fixed transition table.
//!
//! The table is total: any transition not explicitly listed is illegal and
//! surfaces as a typed error. `Init` is the sole initial state, `Complete`
//! the sole terminal state. `Refine` self-loops for chat-driven adjustment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// States of the financial-analysis workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Init,
    Ingest,
    Categorize,
    Analyze,
    Budget,
    Evaluate,
    Report,
    Refine,
    WaitingApproval,
    Complete,
}

impl WorkflowState {
    /// Legal target states, in priority order (first listed is the default
    /// continuation taken by the orchestrator).
    pub fn valid_targets(self) -> &'static [WorkflowState] {
        use WorkflowState::*;
        match self {
            Init => &[Ingest],
            Ingest => &[Categorize],
            Categorize => &[Analyze],
            Analyze => &[Budget],
            Budget => &[Evaluate],
            Evaluate => &[Report, WaitingApproval],
            Report => &[Refine, Complete],
            Refine => &[Refine, Complete],
            WaitingApproval => &[Report],
            Complete => &[],
        }
    }

    /// Check whether a transition to `target` is listed in the table.
    pub fn can_transition_to(self, target: WorkflowState) -> bool {
        self.valid_targets().contains(&target)
    }

    /// Validate a transition, returning the target on success.
    pub fn transition_to(self, target: WorkflowState) -> Result<WorkflowState, TransitionError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(TransitionError { from: self, to: target })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == WorkflowState::Complete
    }

    /// Agent bound to this state, if any. Structural states
    /// (Init, WaitingApproval, Complete) have no agent.
    pub fn agent_name(self) -> Option<&'static str> {
        use WorkflowState::*;
        match self {
            Ingest => Some("ingestion"),
            Categorize => Some("categorization"),
            Analyze => Some("analysis"),
            Budget => Some("budgeting"),
            Evaluate => Some("evaluation"),
            Report => Some("reporting"),
            Refine => Some("conversation"),
            Init | WaitingApproval | Complete => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        use WorkflowState::*;
        match self {
            Init => "INIT",
            Ingest => "INGEST",
            Categorize => "CATEGORIZE",
            Analyze => "ANALYZE",
            Budget => "BUDGET",
            Evaluate => "EVALUATE",
            Report => "REPORT",
            Refine => "REFINE",
            WaitingApproval => "WAITING_APPROVAL",
            Complete => "COMPLETE",
        }
    }

    pub fn parse(s: &str) -> Option<WorkflowState> {
        use WorkflowState::*;
        match s {
            "INIT" => Some(Init),
            "INGEST" => Some(Ingest),
            "CATEGORIZE" => Some(Categorize),
            "ANALYZE" => Some(Analyze),
            "BUDGET" => Some(Budget),
            "EVALUATE" => Some(Evaluate),
            "REPORT" => Some(Report),
            "REFINE" => Some(Refine),
            "WAITING_APPROVAL" => Some(WaitingApproval),
            "COMPLETE" => Some(Complete),
            _ => None,
        }
    }

    /// All states, for exhaustive table checks.
    pub fn all() -> &'static [WorkflowState] {
        use WorkflowState::*;
        &[
            Init,
            Ingest,
            Categorize,
            Analyze,
            Budget,
            Evaluate,
            Report,
            Refine,
            WaitingApproval,
            Complete,
        ]
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempted transition not listed in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition from {from} to {to}")]
pub struct TransitionError {
    pub from: WorkflowState,
    pub to: WorkflowState,
}
