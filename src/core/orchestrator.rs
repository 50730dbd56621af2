//! Workflow orchestrator.
//!
//! Drives one session through the state machine, executing the agent bound
//! to each state with the full reliability stack around it: circuit check,
//! retried execution, fallback on exhaustion, checkpoint after every step,
//! and session-guard caps on iterations, tokens and runtime. High anomaly
//! risk parks the session behind a human approval; `resume_from_approval`
//! picks it back up once the request is resolved.
//!
//! `run` never returns an error: a failed session produces a result with
//! `success = false` and whatever partial event log was accumulated.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::agents::AgentRegistry;
use crate::approval::{ApprovalManager, ApprovalStatus, ApprovalType};
use crate::config::Config;
use crate::domain::{SessionContext, SessionEvent, WorkflowState};
use crate::llm::LlmClient;
use crate::memory::{CompressedContext, MemoryManager};
use crate::reliability::{
    Checkpoint, CheckpointManager, CircuitBreaker, FallbackManager, FallbackType, RetryError,
    RetryManager, SessionGuard,
};
use crate::storage::Database;

use super::event_log::EventLog;

/// Outcome of one orchestrated run, resume, or refinement pass.
#[derive(Debug, Clone)]
pub struct OrchestratorResult {
    pub session_id: String,
    pub success: bool,
    pub final_state: WorkflowState,
    pub report: Option<Value>,
    pub refinement: Option<Value>,
    /// Set when the session is parked waiting for a human decision.
    pub pending_approval: Option<String>,
    /// At least one stage ran on a fallback result.
    pub degraded: bool,
    pub error: Option<String>,
    pub events: Vec<SessionEvent>,
}

pub struct Orchestrator {
    config: Config,
    registry: AgentRegistry,
    event_log: EventLog,
    retry: RetryManager,
    circuits: CircuitBreaker,
    fallbacks: FallbackManager,
    checkpoints: CheckpointManager,
    guard: SessionGuard,
    approvals: ApprovalManager,
    memory: Arc<MemoryManager>,
}

impl Orchestrator {
    pub fn new(config: Config, db: Arc<Database>, llm: Arc<dyn LlmClient>) -> Orchestrator {
        let memory = Arc::new(MemoryManager::new(db.clone()));
        Orchestrator {
            registry: AgentRegistry::new(llm, memory.clone()),
            event_log: EventLog::new(db.clone()),
            retry: RetryManager::new(config.retry.clone(), db.clone()),
            circuits: CircuitBreaker::new(config.circuit_breaker.clone(), db.clone()),
            fallbacks: FallbackManager::new(db.clone()),
            checkpoints: CheckpointManager::new(db.clone()),
            guard: SessionGuard::new(config.session.clone(), db.clone()),
            approvals: ApprovalManager::new(db.clone(), config.approval_thresholds.clone()),
            memory,
            config,
        }
    }

    pub fn approvals(&self) -> &ApprovalManager {
        &self.approvals
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn circuits(&self) -> &CircuitBreaker {
        &self.circuits
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Override a stage's fallback with a custom handler.
    pub fn register_fallback(
        &mut self,
        agent_name: &str,
        fallback_type: FallbackType,
        handler: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) {
        self.fallbacks.register(agent_name, fallback_type, handler);
    }

    /// Run a fresh session end to end.
    #[instrument(skip(self, input))]
    pub async fn run(&self, user_id: &str, input: Value) -> OrchestratorResult {
        let session_id = Uuid::new_v4().to_string();
        info!(session_id = %session_id, user_id, "starting session");

        let mut context = SessionContext::new();
        match self
            .run_pipeline(&session_id, user_id, WorkflowState::Init, &mut context, &input)
            .await
        {
            Ok(result) => result,
            Err(e) => self.failure_result(&session_id, e.to_string()),
        }
    }

    /// Continue a session parked in `WAITING_APPROVAL`. Returns a pending
    /// result if the request is unresolved, a failure if it was rejected.
    #[instrument(skip(self))]
    pub async fn resume_from_approval(&self, session_id: &str) -> OrchestratorResult {
        match self.try_resume_from_approval(session_id).await {
            Ok(result) => result,
            Err(e) => self.failure_result(session_id, e.to_string()),
        }
    }

    /// One chat-driven refinement turn over a finished session's report.
    #[instrument(skip(self))]
    pub async fn refine_session(&self, session_id: &str, message: &str) -> OrchestratorResult {
        match self.try_refine(session_id, message).await {
            Ok(result) => result,
            Err(e) => self.failure_result(session_id, e.to_string()),
        }
    }

    /// Sweep for sessions interrupted mid-flight and resume each one.
    /// Sessions waiting for approval are left alone.
    pub async fn recover(&self) -> Vec<OrchestratorResult> {
        let sessions = match self.checkpoints.incomplete_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "crash-recovery sweep failed");
                return Vec::new();
            }
        };

        let mut results = Vec::new();
        for session_id in sessions {
            match self.try_recover_session(&session_id).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => results.push(self.failure_result(&session_id, e.to_string())),
            }
        }
        results
    }

    async fn try_recover_session(&self, session_id: &str) -> Result<Option<OrchestratorResult>> {
        let checkpoint = self
            .checkpoints
            .load(session_id)?
            .ok_or_else(|| anyhow!("no checkpoint for session {session_id}"))?;
        if checkpoint.current_state == WorkflowState::WaitingApproval {
            return Ok(None);
        }

        info!(
            session_id,
            state = %checkpoint.current_state,
            "resuming interrupted session"
        );
        let mut context = SessionContext::from_partial_outputs(&checkpoint.partial_outputs);
        let result = self
            .run_pipeline(
                session_id,
                &checkpoint.user_id,
                checkpoint.current_state,
                &mut context,
                &json!({}),
            )
            .await?;
        Ok(Some(result))
    }

    async fn try_resume_from_approval(&self, session_id: &str) -> Result<OrchestratorResult> {
        let checkpoint = self
            .checkpoints
            .load(session_id)?
            .ok_or_else(|| anyhow!("no checkpoint for session {session_id}"))?;
        if checkpoint.current_state != WorkflowState::WaitingApproval {
            bail!(
                "session {session_id} is not waiting for approval (state {})",
                checkpoint.current_state
            );
        }

        let request = self
            .approvals
            .session_requests(session_id)?
            .into_iter()
            .last()
            .ok_or_else(|| anyhow!("session {session_id} has no approval request"))?;

        match request.status {
            ApprovalStatus::Pending => Ok(OrchestratorResult {
                session_id: session_id.to_string(),
                success: false,
                final_state: WorkflowState::WaitingApproval,
                report: None,
                refinement: None,
                pending_approval: Some(request.request_id),
                degraded: false,
                error: None,
                events: self.event_log.replay_session(session_id)?,
            }),
            ApprovalStatus::Rejected | ApprovalStatus::Cancelled => {
                self.checkpoints.mark_complete(session_id)?;
                info!(session_id, status = %request.status, "session closed without report");
                Ok(OrchestratorResult {
                    session_id: session_id.to_string(),
                    success: false,
                    final_state: WorkflowState::WaitingApproval,
                    report: None,
                    refinement: None,
                    pending_approval: None,
                    degraded: false,
                    error: Some(format!("approval request was {}", request.status)),
                    events: self.event_log.replay_session(session_id)?,
                })
            }
            ApprovalStatus::Approved => {
                let mut context =
                    SessionContext::from_partial_outputs(&checkpoint.partial_outputs);
                self.run_pipeline(
                    session_id,
                    &checkpoint.user_id,
                    WorkflowState::WaitingApproval,
                    &mut context,
                    &json!({}),
                )
                .await
            }
        }
    }

    async fn try_refine(&self, session_id: &str, message: &str) -> Result<OrchestratorResult> {
        let checkpoint = self
            .checkpoints
            .load(session_id)?
            .ok_or_else(|| anyhow!("no checkpoint for session {session_id}"))?;
        if !checkpoint.partial_outputs.contains_key("reporting") {
            bail!("session {session_id} has no report to refine");
        }

        let mut context = SessionContext::from_partial_outputs(&checkpoint.partial_outputs);
        let mut state = WorkflowState::Report.transition_to(WorkflowState::Refine)?;

        let mut input = self.merged_report_input(&context);
        if let Value::Object(map) = &mut input {
            map.insert("message".to_string(), json!(message));
        }

        let (output, degraded) = self
            .execute_agent(session_id, "conversation", state, &input)
            .await?;
        context.refine_output = Some(output.clone());

        // Refinement commands return recomputed metrics; fold them into the
        // report so later turns and the caller see the adjusted numbers.
        if let Some(Value::Object(metrics)) = output.get("updated_metrics") {
            if !metrics.is_empty() {
                if let Some(Value::Object(report)) = &mut context.report {
                    report.extend(metrics.clone());
                }
            }
        }

        if output.get("action").and_then(Value::as_str) == Some("complete") {
            state = state.transition_to(WorkflowState::Complete)?;
        }

        Ok(OrchestratorResult {
            session_id: session_id.to_string(),
            success: true,
            final_state: state,
            report: context.report.clone(),
            refinement: Some(output),
            pending_approval: None,
            degraded,
            error: None,
            events: self.event_log.replay_session(session_id)?,
        })
    }

    async fn run_pipeline(
        &self,
        session_id: &str,
        user_id: &str,
        start_state: WorkflowState,
        context: &mut SessionContext,
        original_input: &Value,
    ) -> Result<OrchestratorResult> {
        self.guard.start_session(session_id)?;

        let mut state = start_state;
        let mut degraded = false;

        while !state.is_terminal() {
            let iteration = self.guard.increment_iteration(session_id)?;
            if iteration > self.config.orchestrator.max_iterations {
                bail!("orchestrator iteration cap exceeded in state {state}");
            }

            let next = self.choose_next_state(state, context)?;
            state = state.transition_to(next)?;

            if state == WorkflowState::WaitingApproval {
                let max_risk = max_anomaly_risk(context);
                let request_id = self.approvals.request_approval(
                    session_id,
                    ApprovalType::AnomalyDetected,
                    &format!("anomaly risk {max_risk:.2} requires review"),
                    Some(&json!({"max_anomaly_risk": max_risk})),
                )?;
                self.save_checkpoint(session_id, user_id, state, context, iteration)?;
                self.memory.update_short_term_state(session_id, user_id, state)?;
                self.event_log.log_event(&SessionEvent::new(
                    session_id,
                    state.as_str(),
                    "orchestrator",
                    json!({"max_anomaly_risk": max_risk}),
                    json!({"status": "waiting_approval", "request_id": &request_id}),
                    false,
                ))?;
                info!(session_id, request_id = %request_id, "session waiting for approval");
                return Ok(OrchestratorResult {
                    session_id: session_id.to_string(),
                    success: false,
                    final_state: state,
                    report: None,
                    refinement: None,
                    pending_approval: Some(request_id),
                    degraded,
                    error: None,
                    events: self.event_log.replay_session(session_id)?,
                });
            }

            // Historical context is fetched once, just before analysis.
            if state == WorkflowState::Analyze && context.historical_context.is_none() {
                degraded |= self.fetch_history(session_id, user_id, state, context).await?;
            }

            if let Some(agent_name) = state.agent_name() {
                let input = self.stage_input(state, context, original_input);
                self.guard.check_limits(session_id, estimate_tokens(&input))?;

                let (output, used_fallback) = self
                    .execute_agent(session_id, agent_name, state, &input)
                    .await?;
                self.guard.record_tokens(
                    session_id,
                    estimate_tokens(&input) + estimate_tokens(&output),
                )?;
                degraded |= used_fallback;

                self.store_output(state, context, output);
                self.save_checkpoint(session_id, user_id, state, context, iteration)?;
                self.memory.update_short_term_state(session_id, user_id, state)?;
            }

            if state == WorkflowState::Complete {
                self.save_checkpoint(session_id, user_id, state, context, iteration)?;
                self.checkpoints.mark_complete(session_id)?;
                self.memory.update_short_term_state(session_id, user_id, state)?;
            }
        }

        info!(session_id, degraded, "session complete");
        Ok(OrchestratorResult {
            session_id: session_id.to_string(),
            success: true,
            final_state: state,
            report: context.report.clone(),
            refinement: None,
            pending_approval: None,
            degraded,
            error: None,
            events: self.event_log.replay_session(session_id)?,
        })
    }

    /// Next state for the batch run. Linear states take their default
    /// continuation; evaluation branches on anomaly risk; the report leads
    /// straight to completion (refinement has its own entry point).
    fn choose_next_state(
        &self,
        state: WorkflowState,
        context: &SessionContext,
    ) -> Result<WorkflowState> {
        let next = match state {
            WorkflowState::Evaluate => {
                let max_risk = max_anomaly_risk(context);
                if self
                    .approvals
                    .requires_approval(ApprovalType::AnomalyDetected, max_risk)
                {
                    WorkflowState::WaitingApproval
                } else {
                    WorkflowState::Report
                }
            }
            WorkflowState::Report => WorkflowState::Complete,
            WorkflowState::WaitingApproval => WorkflowState::Report,
            other => other
                .valid_targets()
                .first()
                .copied()
                .ok_or_else(|| anyhow!("no continuation from state {other}"))?,
        };
        Ok(next)
    }

    fn stage_input(
        &self,
        state: WorkflowState,
        context: &SessionContext,
        original_input: &Value,
    ) -> Value {
        match state {
            WorkflowState::Ingest => original_input.clone(),
            WorkflowState::Categorize => {
                context.ingest_output.clone().unwrap_or_else(|| json!({}))
            }
            WorkflowState::Analyze => {
                context.categorize_output.clone().unwrap_or_else(|| json!({}))
            }
            WorkflowState::Budget => context.analysis.clone().unwrap_or_else(|| json!({})),
            WorkflowState::Evaluate => context.merged_budget_input(),
            WorkflowState::Report | WorkflowState::Refine => self.merged_report_input(context),
            _ => json!({}),
        }
    }

    /// Evaluation output merged over the analysis/budget view, plus any
    /// historical context, for the reporting and refinement stages.
    fn merged_report_input(&self, context: &SessionContext) -> Value {
        let mut merged = match context.merged_budget_input() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(Value::Object(evaluation)) = &context.evaluation {
            merged.extend(evaluation.clone());
        }
        if let Some(historical) = &context.historical_context {
            merged.insert("historical_context".to_string(), historical.clone());
        }
        if let Some(compressed) = &context.compressed_context {
            merged.insert("compressed_context".to_string(), json!(compressed));
        }
        Value::Object(merged)
    }

    fn store_output(&self, state: WorkflowState, context: &mut SessionContext, output: Value) {
        context.last_input = Some(output.clone());
        match state {
            WorkflowState::Ingest => context.ingest_output = Some(output),
            WorkflowState::Categorize => context.categorize_output = Some(output),
            WorkflowState::Analyze => context.analysis = Some(output),
            WorkflowState::Budget => context.budget = Some(output),
            WorkflowState::Evaluate => context.evaluation = Some(output),
            WorkflowState::Report => context.report = Some(output),
            WorkflowState::Refine => context.refine_output = Some(output),
            _ => {}
        }
    }

    async fn fetch_history(
        &self,
        session_id: &str,
        user_id: &str,
        state: WorkflowState,
        context: &mut SessionContext,
    ) -> Result<bool> {
        let input = json!({"user_id": user_id});
        let (output, degraded) = self
            .execute_agent(session_id, "retrieval", state, &input)
            .await?;
        let historical = output
            .get("historical_context")
            .cloned()
            .filter(|v| !v.is_null());
        if let Some(historical) = &historical {
            // Rendered as prose so the reporting prompt can carry it as-is.
            context.compressed_context =
                serde_json::from_value::<CompressedContext>(historical.clone())
                    .map(|c| c.to_llm_prompt())
                    .ok();
        }
        context.historical_context = historical;
        Ok(degraded)
    }

    /// Execute one agent behind the full reliability stack. An open circuit
    /// skips the retry budget and goes straight to fallback.
    async fn execute_agent(
        &self,
        session_id: &str,
        agent_name: &str,
        state: WorkflowState,
        input: &Value,
    ) -> Result<(Value, bool)> {
        let agent = self
            .registry
            .get(agent_name)
            .ok_or_else(|| anyhow!("unknown agent: {agent_name}"))?;

        if !self.circuits.can_execute(agent_name) {
            warn!(session_id, agent = agent_name, "circuit open, skipping execution");
            let error = RetryError::CircuitOpen(agent_name.to_string());
            return self.degrade(session_id, agent_name, state, input, &error.to_string());
        }

        let mut last_error: Option<RetryError> = None;
        for _ in 0..=self.config.orchestrator.max_retries {
            match self
                .retry
                .execute_with_retry(session_id, agent_name, || {
                    agent.execute(session_id, input)
                })
                .await
            {
                Ok(output) => {
                    self.circuits.record_success(agent_name);
                    self.event_log.log_event(&SessionEvent::new(
                        session_id,
                        state.as_str(),
                        agent_name,
                        input.clone(),
                        output.clone(),
                        false,
                    ))?;
                    return Ok((output, false));
                }
                Err(e) => {
                    self.circuits.record_failure(agent_name);
                    let non_retryable =
                        matches!(&e, RetryError::Permanent { non_retryable: true, .. });
                    last_error = Some(e);
                    if non_retryable {
                        break;
                    }
                }
            }
        }

        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "agent failed without a recorded error".to_string());
        self.event_log.log_event(&SessionEvent::new(
            session_id,
            state.as_str(),
            agent_name,
            input.clone(),
            json!({"error": error}),
            true,
        ))?;
        self.degrade(session_id, agent_name, state, input, &error)
    }

    /// Route a failed agent to its fallback. Ingestion has none: without
    /// valid transactions there is nothing downstream to degrade into.
    fn degrade(
        &self,
        session_id: &str,
        agent_name: &str,
        state: WorkflowState,
        input: &Value,
        error: &str,
    ) -> Result<(Value, bool)> {
        if !self.config.orchestrator.fallback_enabled || agent_name == "ingestion" {
            bail!("agent {agent_name} failed permanently: {error}");
        }

        let fallback_type = match agent_name {
            "categorization" => FallbackType::RuleBased,
            "budgeting" => FallbackType::Deterministic,
            "retrieval" => FallbackType::Cached,
            _ => FallbackType::Minimal,
        };
        let envelope =
            self.fallbacks
                .execute_fallback(session_id, agent_name, fallback_type, input, error);

        let mut output = envelope
            .get("fallback_result")
            .cloned()
            .unwrap_or(Value::Null);
        if let Value::Object(map) = &mut output {
            map.insert("degraded_mode".to_string(), json!(true));
        }

        self.event_log.log_event(&SessionEvent::new(
            session_id,
            state.as_str(),
            agent_name,
            input.clone(),
            envelope,
            false,
        ))?;
        warn!(
            session_id,
            agent = agent_name,
            fallback = fallback_type.as_str(),
            "agent degraded to fallback"
        );
        Ok((output, true))
    }

    fn save_checkpoint(
        &self,
        session_id: &str,
        user_id: &str,
        state: WorkflowState,
        context: &SessionContext,
        iteration: u32,
    ) -> Result<()> {
        let mut checkpoint = Checkpoint::new(session_id, user_id, state);
        checkpoint.partial_outputs = context.partial_outputs();
        checkpoint.completed_agents = checkpoint.partial_outputs.keys().cloned().collect();
        checkpoint.iteration = iteration;
        checkpoint.is_complete = state.is_terminal();
        self.checkpoints.save(&checkpoint)?;
        Ok(())
    }

    fn failure_result(&self, session_id: &str, error: String) -> OrchestratorResult {
        warn!(session_id, error = %error, "session failed");
        let final_state = self
            .memory
            .short_term_state(session_id)
            .ok()
            .flatten()
            .unwrap_or(WorkflowState::Init);
        OrchestratorResult {
            session_id: session_id.to_string(),
            success: false,
            final_state,
            report: None,
            refinement: None,
            pending_approval: None,
            degraded: false,
            error: Some(error),
            events: self.event_log.replay_session(session_id).unwrap_or_default(),
        }
    }
}

fn max_anomaly_risk(context: &SessionContext) -> f64 {
    context
        .anomalies()
        .iter()
        .filter_map(|a| a.get("risk_score").and_then(Value::as_f64))
        .fold(0.0, f64::max)
}

/// Rough token estimate: one token per four bytes of serialized payload.
fn estimate_tokens(value: &Value) -> u64 {
    (value.to_string().len() / 4) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(&json!({})), 0);
        let value = json!({"description": "a longer payload with some content"});
        assert!(estimate_tokens(&value) > 5);
    }

    #[test]
    fn test_max_anomaly_risk() {
        let mut context = SessionContext::new();
        assert_eq!(max_anomaly_risk(&context), 0.0);
        context.analysis = Some(json!({"anomalies": [
            {"risk_score": 0.4}, {"risk_score": 0.9}, {"risk_score": 0.2},
        ]}));
        assert_eq!(max_anomaly_risk(&context), 0.9);
    }
}
