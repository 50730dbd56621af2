//! LLM client seam.
//!
//! Agents that produce narrative text (reporting, conversation) talk to the
//! model through this trait, so the pipeline is testable without a network.
//! `MockLlm` echoes deterministically and can be scripted to fail, which is
//! how the retry and fallback paths get exercised end to end.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::reliability::AgentError;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one message with optional compressed historical context.
    async fn chat(&self, message: &str, context: Option<&str>) -> Result<String, AgentError>;
}

/// Deterministic in-process stand-in for a real model.
#[derive(Default)]
pub struct MockLlm {
    scripted_failures: Mutex<VecDeque<AgentError>>,
}

impl MockLlm {
    pub fn new() -> MockLlm {
        MockLlm::default()
    }

    /// Queue an error to be returned by the next `chat` call. Multiple
    /// queued errors are consumed in order, then calls succeed again.
    pub fn fail_next(&self, error: AgentError) {
        self.lock_failures().push_back(error);
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, VecDeque<AgentError>> {
        self.scripted_failures.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(&self, message: &str, context: Option<&str>) -> Result<String, AgentError> {
        if let Some(error) = self.lock_failures().pop_front() {
            return Err(error);
        }
        match context {
            Some(ctx) => Ok(format!("{message} (context: {ctx})")),
            None => Ok(message.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes() {
        let llm = MockLlm::new();
        assert_eq!(llm.chat("hello", None).await.unwrap(), "hello");
        assert_eq!(
            llm.chat("hello", Some("history")).await.unwrap(),
            "hello (context: history)"
        );
    }

    #[tokio::test]
    async fn test_scripted_failures_consume_in_order() {
        let llm = MockLlm::new();
        llm.fail_next(AgentError::Timeout("t1".into()));
        llm.fail_next(AgentError::Network("n1".into()));

        assert_eq!(
            llm.chat("a", None).await.unwrap_err(),
            AgentError::Timeout("t1".into())
        );
        assert_eq!(
            llm.chat("b", None).await.unwrap_err(),
            AgentError::Network("n1".into())
        );
        assert!(llm.chat("c", None).await.is_ok());
    }
}
