//! Approval gating: high-risk sessions park and resume.

use std::sync::Arc;

use serde_json::{json, Value};

use finflow::config::Config;
use finflow::llm::MockLlm;
use finflow::{ApprovalError, ApprovalStatus, Database, Orchestrator, WorkflowState};

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

/// Eight routine expenses plus one extreme outlier, which the IQR detector
/// flags with a risk score above the 0.7 approval threshold.
fn risky_input() -> Value {
    let mut items: Vec<Value> = vec![json!({
        "date": "2025-01-01", "description": "Salary", "amount": 5000.0,
    })];
    for i in 1..=8 {
        items.push(json!({
            "date": "2025-01-02", "description": "Grocery Store",
            "amount": -(i as f64 * 10.0),
        }));
    }
    items.push(json!({
        "date": "2025-01-20", "description": "Wire Transfer", "amount": -10_000.0,
    }));
    json!({"transactions": items})
}

#[tokio::test]
async fn high_risk_session_parks_for_approval() {
    let orchestrator = orchestrator();
    let result = orchestrator.run("user-1", risky_input()).await;

    assert!(!result.success);
    assert!(result.error.is_none());
    assert_eq!(result.final_state, WorkflowState::WaitingApproval);
    assert!(result.report.is_none());
    let request_id = result.pending_approval.expect("no approval request");

    let request = orchestrator.approvals().get_request(&request_id).unwrap();
    assert_eq!(request.status, ApprovalStatus::Pending);
    assert_eq!(request.session_id, result.session_id);

    // The park itself is in the event log, tied to the request.
    let parked = result
        .events
        .iter()
        .find(|e| e.agent_name == "orchestrator")
        .expect("no orchestrator event for the park");
    assert_eq!(parked.output_payload["status"], json!("waiting_approval"));
    assert_eq!(parked.output_payload["request_id"], json!(request_id));

    // The parked session is checkpointed and resumable.
    assert!(orchestrator.checkpoints().has_checkpoint(&result.session_id));
    let checkpoint = orchestrator
        .checkpoints()
        .load(&result.session_id)
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.current_state, WorkflowState::WaitingApproval);
}

#[tokio::test]
async fn approved_session_resumes_to_completion() {
    let orchestrator = orchestrator();
    let parked = orchestrator.run("user-1", risky_input()).await;
    let request_id = parked.pending_approval.unwrap();

    orchestrator
        .approvals()
        .approve(&request_id, "analyst", Some("reviewed the wire"))
        .unwrap();

    let resumed = orchestrator.resume_from_approval(&parked.session_id).await;
    assert!(resumed.success, "resume failed: {:?}", resumed.error);
    assert_eq!(resumed.final_state, WorkflowState::Complete);
    assert!(resumed.report.is_some());

    // A second resume finds the session no longer waiting.
    let again = orchestrator.resume_from_approval(&parked.session_id).await;
    assert!(!again.success);
    assert!(again.error.unwrap().contains("not waiting"));
}

#[tokio::test]
async fn rejected_session_closes_without_report() {
    let orchestrator = orchestrator();
    let parked = orchestrator.run("user-1", risky_input()).await;
    let request_id = parked.pending_approval.unwrap();

    orchestrator
        .approvals()
        .reject(&request_id, "analyst", Some("unrecognized transfer"))
        .unwrap();

    let resumed = orchestrator.resume_from_approval(&parked.session_id).await;
    assert!(!resumed.success);
    assert!(resumed.report.is_none());
    assert!(resumed.error.unwrap().contains("rejected"));
    // The session is closed for good.
    assert!(!orchestrator.checkpoints().has_checkpoint(&parked.session_id));
}

#[tokio::test]
async fn unresolved_request_stays_pending_on_resume() {
    let orchestrator = orchestrator();
    let parked = orchestrator.run("user-1", risky_input()).await;
    let request_id = parked.pending_approval.clone().unwrap();

    let resumed = orchestrator.resume_from_approval(&parked.session_id).await;
    assert!(!resumed.success);
    assert_eq!(resumed.pending_approval, Some(request_id));
    assert_eq!(resumed.final_state, WorkflowState::WaitingApproval);
}

#[tokio::test]
async fn resolved_requests_are_immutable() {
    let orchestrator = orchestrator();
    let parked = orchestrator.run("user-1", risky_input()).await;
    let request_id = parked.pending_approval.unwrap();

    orchestrator
        .approvals()
        .approve(&request_id, "analyst", None)
        .unwrap();
    let err = orchestrator
        .approvals()
        .reject(&request_id, "someone-else", None)
        .unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::AlreadyResolved {
            status: ApprovalStatus::Approved,
            ..
        }
    ));
}

#[tokio::test]
async fn low_risk_session_needs_no_approval() {
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
    assert!(result.pending_approval.is_none());
    assert!(orchestrator
        .approvals()
        .session_requests(&result.session_id)
        .unwrap()
        .is_empty());
}
