//! Per-agent circuit breaker over a rolling outcome window.
//!
//! Each agent gets an independent circuit. The error rate is recomputed
//! over the recorded outcomes after every failure, so a persistently
//! failing agent is gated as soon as the rate crosses the threshold rather
//! than after a full window. After a cooldown the circuit admits a limited
//! number of test requests (half-open); test outcomes enter the same
//! window, and the circuit closes once the recomputed rate recovers. State
//! lives in memory; transitions are written to an audit table so operators
//! can reconstruct the timeline.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Error rate over the rolling window that opens the circuit.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,

    /// A half-open circuit closes once the window's error rate drops below
    /// `1 - success_threshold`.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,

    /// Number of most-recent outcomes considered.
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,

    /// Seconds an open circuit waits before admitting test requests.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Requests admitted while half-open.
    #[serde(default = "default_test_requests")]
    pub test_requests: u32,
}

fn default_error_threshold() -> f64 {
    0.4
}
fn default_success_threshold() -> f64 {
    0.6
}
fn default_rolling_window() -> usize {
    20
}
fn default_cooldown_seconds() -> u64 {
    60
}
fn default_test_requests() -> u32 {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            success_threshold: default_success_threshold(),
            rolling_window: default_rolling_window(),
            cooldown_seconds: default_cooldown_seconds(),
            test_requests: default_test_requests(),
        }
    }
}

/// Snapshot of one agent's circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub error_rate: f64,
    pub window_len: usize,
}

#[derive(Debug)]
struct AgentCircuit {
    state: CircuitState,
    /// Rolling window of outcomes, `true` = success.
    outcomes: VecDeque<bool>,
    last_failure: Option<Instant>,
    test_attempts: u32,
}

impl AgentCircuit {
    fn new() -> AgentCircuit {
        AgentCircuit {
            state: CircuitState::Closed,
            outcomes: VecDeque::new(),
            last_failure: None,
            test_attempts: 0,
        }
    }

    fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / self.outcomes.len() as f64
    }
}

/// Tracks outcomes per agent and gates execution.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    db: Arc<Database>,
    circuits: Mutex<HashMap<String, AgentCircuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, db: Arc<Database>) -> CircuitBreaker {
        CircuitBreaker {
            config,
            db,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a request for `agent_name` may proceed right now.
    ///
    /// An open circuit whose cooldown has elapsed flips to half-open as a
    /// side effect and admits the request as a test.
    pub fn can_execute(&self, agent_name: &str) -> bool {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(agent_name.to_string())
            .or_insert_with(AgentCircuit::new);

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = circuit
                    .last_failure
                    .map(|t| t.elapsed().as_secs() >= self.config.cooldown_seconds)
                    .unwrap_or(false);
                if cooled_down {
                    let rate = circuit.error_rate();
                    circuit.state = CircuitState::HalfOpen;
                    circuit.test_attempts = 1;
                    info!(agent = agent_name, "circuit entering half-open after cooldown");
                    self.log_transition(agent_name, "half_open", "open", "half_open", rate);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if circuit.test_attempts < self.config.test_requests {
                    circuit.test_attempts += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, agent_name: &str) {
        self.record_outcome(agent_name, true);
    }

    pub fn record_failure(&self, agent_name: &str) {
        self.record_outcome(agent_name, false);
    }

    fn record_outcome(&self, agent_name: &str, success: bool) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(agent_name.to_string())
            .or_insert_with(AgentCircuit::new);

        circuit.outcomes.push_back(success);
        while circuit.outcomes.len() > self.config.rolling_window {
            circuit.outcomes.pop_front();
        }

        if success {
            if circuit.state == CircuitState::HalfOpen {
                let rate = circuit.error_rate();
                if rate < 1.0 - self.config.success_threshold {
                    circuit.state = CircuitState::Closed;
                    circuit.last_failure = None;
                    info!(agent = agent_name, error_rate = rate, "circuit closed after recovery");
                    self.log_transition(agent_name, "closed", "half_open", "closed", rate);
                }
            }
            // Success stragglers landing while open leave the state alone.
        } else {
            circuit.last_failure = Some(Instant::now());
            let rate = circuit.error_rate();
            if circuit.state != CircuitState::Open && rate > self.config.error_threshold {
                let previous = circuit.state;
                circuit.state = CircuitState::Open;
                warn!(agent = agent_name, error_rate = rate, "circuit opened");
                let event = if previous == CircuitState::HalfOpen {
                    "reopened"
                } else {
                    "opened"
                };
                self.log_transition(agent_name, event, previous.as_str(), "open", rate);
            }
        }
    }

    pub fn state(&self, agent_name: &str) -> CircuitState {
        self.lock_circuits()
            .get(agent_name)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn stats(&self, agent_name: &str) -> CircuitStats {
        let circuits = self.lock_circuits();
        match circuits.get(agent_name) {
            Some(c) => CircuitStats {
                state: c.state,
                error_rate: c.error_rate(),
                window_len: c.outcomes.len(),
            },
            None => CircuitStats {
                state: CircuitState::Closed,
                error_rate: 0.0,
                window_len: 0,
            },
        }
    }

    /// Manually close an agent's circuit and clear its window.
    pub fn reset(&self, agent_name: &str) {
        let mut circuits = self.lock_circuits();
        if let Some(circuit) = circuits.get_mut(agent_name) {
            let previous = circuit.state;
            *circuit = AgentCircuit::new();
            if previous != CircuitState::Closed {
                self.log_transition(agent_name, "reset", previous.as_str(), "closed", 0.0);
            }
        }
    }

    fn lock_circuits(&self) -> std::sync::MutexGuard<'_, HashMap<String, AgentCircuit>> {
        self.circuits.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log_transition(
        &self,
        agent_name: &str,
        event_type: &str,
        previous: &str,
        new: &str,
        error_rate: f64,
    ) {
        let conn = self.db.conn();
        let result = conn.execute(
            "INSERT OR IGNORE INTO circuit_breaker_events
             (agent_name, timestamp, event_type, previous_state, new_state, error_rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                agent_name,
                Utc::now().to_rfc3339(),
                event_type,
                previous,
                new,
                error_rate,
            ],
        );
        if let Err(e) = result {
            warn!(error = %e, agent = agent_name, "failed to log circuit transition");
        }
    }
}
