//! Crash recovery: interrupted sessions resume from their checkpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use finflow::config::Config;
use finflow::llm::MockLlm;
use finflow::reliability::Checkpoint;
use finflow::{Database, Orchestrator, WorkflowState};

fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config
}

fn orchestrator() -> Orchestrator {
    let db = Arc::new(Database::in_memory().unwrap());
    Orchestrator::new(test_config(), db, Arc::new(MockLlm::new()))
}

/// Checkpoint for a session that crashed right after analysis.
fn interrupted_checkpoint(session_id: &str) -> Checkpoint {
    let mut outputs: BTreeMap<String, Value> = BTreeMap::new();
    outputs.insert(
        "ingestion".to_string(),
        json!({"transactions": [], "count": 3, "source": "inline"}),
    );
    outputs.insert(
        "categorization".to_string(),
        json!({"transactions": [], "categorized_count": 3}),
    );
    outputs.insert(
        "analysis".to_string(),
        json!({
            "total_income": 5000.0,
            "total_expense": 1650.0,
            "net_savings": 3350.0,
            "savings_rate": 67.0,
            "category_breakdown": {"Housing": 1500.0, "Food": 150.0},
            "anomalies": [],
            "transactions": [],
        }),
    );

    let mut checkpoint = Checkpoint::new(session_id, "user-1", WorkflowState::Analyze);
    checkpoint.completed_agents = outputs.keys().cloned().collect();
    checkpoint.partial_outputs = outputs;
    checkpoint.iteration = 3;
    checkpoint
}

#[tokio::test]
async fn interrupted_session_resumes_to_completion() {
    let orchestrator = orchestrator();
    orchestrator
        .checkpoints()
        .save(&interrupted_checkpoint("crashed-1"))
        .unwrap();

    let results = orchestrator.recover().await;
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.session_id, "crashed-1");
    assert!(result.success, "recovery failed: {:?}", result.error);
    assert_eq!(result.final_state, WorkflowState::Complete);

    // The resumed tail reused the checkpointed analysis.
    let report = result.report.as_ref().unwrap();
    assert_eq!(report["summary"]["total_income"], json!(5000.0));
    assert!(!orchestrator.checkpoints().has_checkpoint("crashed-1"));
}

#[tokio::test]
async fn waiting_approval_sessions_are_left_alone() {
    let orchestrator = orchestrator();
    let mut parked = interrupted_checkpoint("parked-1");
    parked.current_state = WorkflowState::WaitingApproval;
    orchestrator.checkpoints().save(&parked).unwrap();

    let results = orchestrator.recover().await;
    assert!(results.is_empty());
    assert!(orchestrator.checkpoints().has_checkpoint("parked-1"));
}

#[tokio::test]
async fn completed_sessions_are_not_swept() {
    let orchestrator = orchestrator();
    let result = orchestrator
        .run(
            "user-1",
            json!({"transactions": [
                {"date": "2025-01-01", "description": "Salary", "amount": 5000.0},
                {"date": "2025-01-05", "description": "Monthly Rent", "amount": -1500.0},
            ]}),
        )
        .await;
    assert!(result.success);

    let results = orchestrator.recover().await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn sweep_handles_multiple_sessions() {
    let orchestrator = orchestrator();
    orchestrator
        .checkpoints()
        .save(&interrupted_checkpoint("crashed-a"))
        .unwrap();
    orchestrator
        .checkpoints()
        .save(&interrupted_checkpoint("crashed-b"))
        .unwrap();

    let results = orchestrator.recover().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(
        orchestrator.checkpoints().incomplete_sessions().unwrap().len(),
        0
    );
}
