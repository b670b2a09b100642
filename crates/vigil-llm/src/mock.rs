//! Scripted provider for tests: replies come from a queue, no HTTP.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::provider::{LlmProvider, LlmRequest, LlmResponse, StopReason, Usage};
use vigil_core::{Message, Result, Role, VigilError};

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Fail(String),
}

/// Answers each `complete` call with the next scripted reply.
///
/// ```
/// use vigil_llm::MockProvider;
/// let provider = MockProvider::new("mock").with_verdict("approve", "Homework site");
/// ```
pub struct MockProvider {
    name: String,
    script: Mutex<VecDeque<Scripted>>,
    requests: Arc<Mutex<Vec<LlmRequest>>>,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    pub fn with_response(self, text: &str) -> Self {
        self.script.lock().push_back(Scripted::Reply(text.to_string()));
        self
    }

    /// Queue a moderation verdict in the JSON shape the moderator expects.
    pub fn with_verdict(self, action: &str, reasoning: &str) -> Self {
        let body = serde_json::json!({ "action": action, "reasoning": reasoning });
        self.with_response(&body.to_string())
    }

    /// Fail the next call with `VigilError::LlmProvider(error)`.
    pub fn with_error(self, error: &str) -> Self {
        self.with_errors(1, error)
    }

    pub fn with_errors(self, count: usize, error: &str) -> Self {
        self.script
            .lock()
            .extend(std::iter::repeat_n(Scripted::Fail(error.to_string()), count));
        self
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared handle on every request received so far.
    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<LlmRequest>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> Vec<String> {
        vec!["test-model".to_string()]
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().push(request.clone());
        let next = self.script.lock().pop_front();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let text = match next {
            Some(Scripted::Reply(text)) => text,
            Some(Scripted::Fail(error)) => return Err(VigilError::LlmProvider(error)),
            None => "(mock: script exhausted)".to_string(),
        };
        Ok(LlmResponse {
            message: Message::text(Role::Assistant, text),
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
                estimated_cost_usd: 0.0,
            },
            stop_reason: StopReason::EndTurn,
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
