//! Pipeline agents.
//!
//! One agent per workflow stage:
//! - ingestion: validate and normalize raw transactions
//! - categorization: keyword categorization
//! - analysis: totals, savings rate, anomaly detection
//! - budgeting: income-tier budget suggestions
//! - evaluation: health score and risk grading
//! - reporting: final report assembly
//! - retrieval: compressed historical context
//! - conversation: chat-driven refinement
//!
//! Agents are pure with respect to the workflow: they take a JSON payload
//! and return one, and every failure is an `AgentError` the reliability
//! layer can classify.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::LlmClient;
use crate::memory::MemoryManager;
use crate::reliability::AgentError;
use crate::security::PrivilegeModel;

pub mod analysis;
pub mod budgeting;
pub mod categorization;
pub mod conversation;
pub mod evaluation;
pub mod ingestion;
pub mod reporting;
pub mod retrieval;

pub use analysis::AnalysisAgent;
pub use budgeting::BudgetingAgent;
pub use categorization::CategorizationAgent;
pub use conversation::ConversationAgent;
pub use evaluation::EvaluationAgent;
pub use ingestion::IngestionAgent;
pub use reporting::ReportingAgent;
pub use retrieval::RetrievalAgent;

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the agent against one input payload.
    async fn execute(&self, session_id: &str, input: &Value) -> Result<Value, AgentError>;
}

/// All agents, keyed by the names the workflow states bind to.
pub struct AgentRegistry {
    agents: HashMap<&'static str, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new(llm: Arc<dyn LlmClient>, memory: Arc<MemoryManager>) -> AgentRegistry {
        let privileges = PrivilegeModel::new();
        let mut agents: HashMap<&'static str, Arc<dyn Agent>> = HashMap::new();

        let all: Vec<Arc<dyn Agent>> = vec![
            Arc::new(IngestionAgent::new(privileges)),
            Arc::new(CategorizationAgent::new(privileges)),
            Arc::new(AnalysisAgent::new(privileges)),
            Arc::new(BudgetingAgent::new(privileges)),
            Arc::new(EvaluationAgent::new(privileges)),
            Arc::new(ReportingAgent::new(privileges, llm.clone())),
            Arc::new(RetrievalAgent::new(privileges, memory)),
            Arc::new(ConversationAgent::new(privileges, llm)),
        ];
        for agent in all {
            agents.insert(agent.name(), agent);
        }

        AgentRegistry { agents }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.agents.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::storage::Database;

    #[test]
    fn test_registry_covers_every_workflow_agent() {
        let db = Arc::new(Database::in_memory().unwrap());
        let registry = AgentRegistry::new(
            Arc::new(MockLlm::new()),
            Arc::new(MemoryManager::new(db)),
        );
        for state in crate::domain::WorkflowState::all() {
            if let Some(name) = state.agent_name() {
                assert!(registry.get(name).is_some(), "missing agent: {name}");
            }
        }
        assert_eq!(registry.names().len(), 8);
    }
}
