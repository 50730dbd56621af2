//! Least-privilege action table for agents.
//!
//! Each agent is allowed a fixed set of actions; anything else is a
//! non-retryable security violation. The table is static and deny-by-default
//! for unknown agents.

use tracing::warn;

use crate::reliability::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    ReadTransactions,
    WriteTransactions,
    CallLlm,
    ReadHistory,
    WriteHistory,
    SuggestBudget,
    GenerateReport,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ReadTransactions => "read_transactions",
            ActionType::WriteTransactions => "write_transactions",
            ActionType::CallLlm => "call_llm",
            ActionType::ReadHistory => "read_history",
            ActionType::WriteHistory => "write_history",
            ActionType::SuggestBudget => "suggest_budget",
            ActionType::GenerateReport => "generate_report",
        }
    }
}

const PERMISSIONS: &[(&str, &[ActionType])] = &[
    (
        "ingestion",
        &[ActionType::ReadTransactions, ActionType::WriteTransactions],
    ),
    (
        "categorization",
        &[
            ActionType::ReadTransactions,
            ActionType::WriteTransactions,
            ActionType::CallLlm,
        ],
    ),
    (
        "analysis",
        &[
            ActionType::ReadTransactions,
            ActionType::ReadHistory,
            ActionType::CallLlm,
        ],
    ),
    (
        "budgeting",
        &[
            ActionType::ReadTransactions,
            ActionType::SuggestBudget,
            ActionType::CallLlm,
        ],
    ),
    (
        "evaluation",
        &[ActionType::ReadTransactions, ActionType::CallLlm],
    ),
    (
        "reporting",
        &[
            ActionType::ReadTransactions,
            ActionType::ReadHistory,
            ActionType::GenerateReport,
            ActionType::CallLlm,
        ],
    ),
    (
        "retrieval",
        &[ActionType::ReadHistory, ActionType::WriteHistory],
    ),
    (
        "conversation",
        &[
            ActionType::ReadTransactions,
            ActionType::ReadHistory,
            ActionType::CallLlm,
        ],
    ),
];

/// Static agent-to-action permission table.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrivilegeModel;

impl PrivilegeModel {
    pub fn new() -> PrivilegeModel {
        PrivilegeModel
    }

    /// Actions the agent may perform; empty for unknown agents.
    pub fn allowed_actions(&self, agent_name: &str) -> &'static [ActionType] {
        PERMISSIONS
            .iter()
            .find(|(name, _)| *name == agent_name)
            .map(|(_, actions)| *actions)
            .unwrap_or(&[])
    }

    /// Deny-by-default validation.
    pub fn validate(&self, agent_name: &str, action: ActionType) -> Result<(), AgentError> {
        if self.allowed_actions(agent_name).contains(&action) {
            Ok(())
        } else {
            warn!(
                agent = agent_name,
                action = action.as_str(),
                "denied unauthorized action"
            );
            Err(AgentError::SecurityViolation(format!(
                "agent '{agent_name}' is not permitted to {}",
                action.as_str()
            )))
        }
    }
}
