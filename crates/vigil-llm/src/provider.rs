use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vigil_core::{Message, Result};

/// A request to an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// The model to use, e.g. "gpt-5-mini" (provider-specific part).
    pub model: String,
    /// Conversation history.
    pub messages: Vec<Message>,
    /// System prompt (separate from messages for providers that support it).
    pub system: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature.
    pub temperature: f32,
    /// Ask the provider for a JSON object response where it supports that.
    pub json_mode: bool,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system: None,
            max_tokens: 1024,
            temperature: 0.2,
            json_mode: false,
        }
    }
}

/// A complete response from an LLM.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub message: Message,
    pub usage: Usage,
    pub stop_reason: StopReason,
}

impl LlmResponse {
    pub fn text(&self) -> String {
        self.message.text_content()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ContentFilter,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Estimated cost in USD (computed by the provider adapter).
    pub estimated_cost_usd: f64,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Trait implemented by each LLM provider (Anthropic, OpenAI-compatible, mock).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short lowercase name used as the model prefix, e.g. "anthropic", "openai".
    fn name(&self) -> &str;

    /// List known models.
    fn models(&self) -> Vec<String>;

    /// Send a request and wait for the full response.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Check if this provider is configured / reachable.
    async fn health_check(&self) -> Result<()>;
}
