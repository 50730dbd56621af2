//! Configuration for the finflow pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variable (FINFLOW_DB for the database path)
//! 2. Config file (YAML)
//! 3. Defaults
//!
//! Every field carries a serde default so a partial config file is valid.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::approval::ApprovalThreshold;
use crate::reliability::{CircuitBreakerConfig, RetryConfig, SessionCaps};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub session: SessionCaps,

    /// Approval thresholds; the built-in table applies when empty.
    #[serde(default)]
    pub approval_thresholds: Vec<ApprovalThreshold>,
}

fn default_db_path() -> String {
    "event_log.db".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            orchestrator: OrchestratorConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            session: SessionCaps::default(),
            approval_thresholds: Vec::new(),
        }
    }
}

impl Config {
    /// Load a config from a YAML file, applying env overrides.
    pub fn from_file(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Config::from_yaml(&content)
    }

    /// Parse a config from YAML content, applying env overrides.
    pub fn from_yaml(content: &str) -> Result<Config> {
        let mut config: Config =
            serde_yaml::from_str(content).context("failed to parse config YAML")?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("FINFLOW_DB") {
            if !path.is_empty() {
                self.db_path = path;
            }
        }
    }
}

/// Orchestrator-level bounds, independent of the retry manager's own
/// backoff loop and the session guard's caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard bound on workflow loop iterations per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Outer per-agent retry bound (each outer attempt runs the retry
    /// manager's full inner backoff loop).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Route exhausted agents through the fallback manager instead of
    /// failing the session.
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_max_retries() -> u32 {
    2
}
fn default_fallback_enabled() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            fallback_enabled: default_fallback_enabled(),
        }
    }
}
