//! Retry, fallback, circuit breaker, and session guard behavior under
//! injected agent failures.

use std::sync::Arc;

use serde_json::{json, Value};

use finflow::config::Config;
use finflow::llm::MockLlm;
use finflow::reliability::TerminationReason;
use finflow::{AgentError, CircuitState, Database, Orchestrator};

fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config
}

fn setup(config: Config) -> (Orchestrator, Arc<MockLlm>) {
    let db = Arc::new(Database::in_memory().unwrap());
    let llm = Arc::new(MockLlm::new());
    (Orchestrator::new(config, db, llm.clone()), llm)
}

fn sample_input() -> Value {
    json!({"transactions": [
        {"date": "2025-01-01", "description": "Salary", "amount": 5000.0},
        {"date": "2025-01-05", "description": "Monthly Rent", "amount": -1500.0},
        {"date": "2025-01-12", "description": "Grocery Store", "amount": -150.0},
    ]})
}

#[tokio::test]
async fn transient_llm_failures_are_retried() {
    let (orchestrator, llm) = setup(fast_config());
    llm.fail_next(AgentError::Timeout("model overloaded".into()));
    llm.fail_next(AgentError::Network("connection reset".into()));

    let result = orchestrator.run("user-1", sample_input()).await;
    assert!(result.success, "run failed: {:?}", result.error);
    // The retries absorbed both failures without degrading the session.
    assert!(!result.degraded);
    assert!(result.report.unwrap()["report_text"].is_string());
}

#[tokio::test]
async fn exhausted_agent_degrades_to_fallback() {
    let mut config = fast_config();
    config.retry.max_retries = 1;
    config.orchestrator.max_retries = 1;
    let (orchestrator, llm) = setup(config);
    for _ in 0..10 {
        llm.fail_next(AgentError::Timeout("model down".into()));
    }

    let result = orchestrator.run("user-1", sample_input()).await;
    // The session still completes, on a degraded report.
    assert!(result.success, "run failed: {:?}", result.error);
    assert!(result.degraded);

    let report = result.report.unwrap();
    assert_eq!(report["degraded_mode"], json!(true));

    // The fallback invocation is visible in the event log.
    let fallback_event = result
        .events
        .iter()
        .find(|e| e.agent_name == "reporting" && e.output_payload.get("fallback_type").is_some())
        .expect("no fallback event for reporting");
    assert_eq!(fallback_event.output_payload["fallback_type"], json!("minimal"));
    assert_eq!(fallback_event.output_payload["degraded_mode"], json!(true));
}

#[tokio::test]
async fn repeated_failures_open_the_circuit() {
    let mut config = fast_config();
    config.retry.max_retries = 0;
    config.orchestrator.max_retries = 1;
    config.circuit_breaker.rolling_window = 4;
    let (orchestrator, llm) = setup(config);

    // A run with nothing but reporting failures opens the circuit: the
    // error rate is recomputed on every failure, and an all-failure
    // window is over the threshold from the first sample.
    llm.fail_next(AgentError::Timeout("down".into()));
    llm.fail_next(AgentError::Timeout("down".into()));
    let result = orchestrator.run("user-1", sample_input()).await;
    assert!(result.success);
    assert!(result.degraded);
    assert_eq!(orchestrator.circuits().state("reporting"), CircuitState::Open);

    // With the circuit open the model is never consulted; the run goes
    // straight to fallback without burning the retry budget.
    let result = orchestrator.run("user-1", sample_input()).await;
    assert!(result.success);
    assert!(result.degraded);
    assert_eq!(orchestrator.circuits().state("reporting"), CircuitState::Open);
    // Other agents' circuits are untouched.
    assert_eq!(orchestrator.circuits().state("analysis"), CircuitState::Closed);
}

#[tokio::test]
async fn session_guard_terminates_runaway_sessions() {
    let mut config = fast_config();
    config.session.max_iterations = 3;
    let (orchestrator, _) = setup(config);

    let result = orchestrator.run("user-1", sample_input()).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("terminated"));

    // The violating iteration count itself was persisted.
    let stats = orchestrator
        .guard()
        .stats(&result.session_id)
        .unwrap()
        .unwrap();
    assert_eq!(stats.iteration, 4);
    assert_eq!(stats.termination_reason, Some(TerminationReason::MaxIterations));
}

#[tokio::test]
async fn token_budget_is_enforced() {
    let mut config = fast_config();
    config.session.max_tokens = 10;
    let (orchestrator, _) = setup(config);

    let result = orchestrator.run("user-1", sample_input()).await;
    assert!(!result.success);
    let stats = orchestrator
        .guard()
        .stats(&result.session_id)
        .unwrap()
        .unwrap();
    assert_eq!(stats.termination_reason, Some(TerminationReason::MaxTokens));
}

#[tokio::test]
async fn custom_fallback_handler_is_used() {
    let mut config = fast_config();
    config.retry.max_retries = 0;
    config.orchestrator.max_retries = 0;
    let db = Arc::new(Database::in_memory().unwrap());
    let llm = Arc::new(MockLlm::new());
    let mut orchestrator = Orchestrator::new(config, db, llm.clone());
    orchestrator.register_fallback("reporting", finflow::FallbackType::Minimal, |_| {
        json!({"report_text": "service temporarily degraded"})
    });

    llm.fail_next(AgentError::Timeout("down".into()));
    let result = orchestrator.run("user-1", sample_input()).await;
    assert!(result.success);
    assert!(result.degraded);
    assert_eq!(
        result.report.unwrap()["report_text"],
        json!("service temporarily degraded")
    );
}
