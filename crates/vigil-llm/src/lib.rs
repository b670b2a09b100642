//! # vigil-llm
//!
//! Abstraction layer over LLM providers used by the moderation capability.
//! Supports image inputs, JSON-mode requests, and automatic failover between
//! providers behind a circuit breaker.

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use provider::{LlmProvider, LlmRequest, LlmResponse, StopReason, Usage};
pub use router::ModelRouter;
