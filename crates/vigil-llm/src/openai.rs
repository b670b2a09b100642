use async_trait::async_trait;
use tracing::{debug, info};
use vigil_core::{Message, MessageContent, Result, Role, VigilError};

use crate::provider::*;

/// OpenAI-compatible API provider (works with OpenAI, Azure, vLLM, Ollama, etc.)
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            provider_name: "openai".into(),
        }
    }

    /// Use a custom base URL (for Azure, vLLM, etc.)
    pub fn with_base_url(mut self, url: String, name: String) -> Self {
        self.base_url = url;
        self.provider_name = name;
        self
    }

    pub(crate) fn build_request_body(&self, request: &LlmRequest) -> serde_json::Value {
        let mut messages = Vec::new();

        if let Some(ref system) = request.system {
            messages.push(serde_json::json!({
                "role": "system",
                "content": system,
            }));
        }

        for msg in &request.messages {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            // Plain string content unless the message carries images
            let content = if msg.images().next().is_none() {
                serde_json::json!(msg.text_content())
            } else {
                let parts: Vec<serde_json::Value> = msg
                    .content
                    .iter()
                    .map(|block| match block {
                        MessageContent::Text { text } => serde_json::json!({
                            "type": "text",
                            "text": text,
                        }),
                        MessageContent::Image { data, media_type } => serde_json::json!({
                            "type": "image_url",
                            "image_url": { "url": format!("data:{media_type};base64,{data}") },
                        }),
                    })
                    .collect();
                serde_json::json!(parts)
            };
            messages.push(serde_json::json!({
                "role": role,
                "content": content,
            }));
        }

        let mut body = serde_json::json!({
            "model": &request.model,
            "messages": messages,
        });

        // Reasoning models reject a custom temperature
        if !is_reasoning_model(&request.model) {
            body["temperature"] = serde_json::json!(request.temperature);
        }

        // Newer OpenAI models (o1, o3, gpt-5, …) require max_completion_tokens
        if uses_max_completion_tokens(&request.model) {
            body["max_completion_tokens"] = serde_json::json!(request.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(request.max_tokens);
        }

        if request.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn models(&self) -> Vec<String> {
        vec![
            "gpt-5-mini".into(),
            "gpt-5".into(),
            "gpt-4o".into(),
            "gpt-4o-mini".into(),
        ]
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.build_request_body(request);
        debug!(provider = %self.provider_name, model = %request.model, "sending chat completion request");

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| VigilError::LlmProvider(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(VigilError::LlmProvider(format!("HTTP {status}: {text}")));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| VigilError::LlmProvider(e.to_string()))?;

        let choice = &data["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let finish_reason = choice["finish_reason"].as_str().unwrap_or("");

        let usage_data = &data["usage"];
        let input_tokens = usage_data["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = usage_data["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let estimated_cost_usd = estimate_openai_cost(&request.model, input_tokens, output_tokens);

        Ok(LlmResponse {
            message: Message::text(Role::Assistant, content),
            usage: Usage {
                input_tokens,
                output_tokens,
                estimated_cost_usd,
            },
            stop_reason: match finish_reason {
                "length" => StopReason::MaxTokens,
                "content_filter" => StopReason::ContentFilter,
                _ => StopReason::EndTurn,
            },
        })
    }

    async fn health_check(&self) -> Result<()> {
        info!(provider = self.provider_name, "checking API health");
        if self.api_key.is_empty() {
            return Err(VigilError::LlmProvider(format!(
                "{} API key not set",
                self.provider_name
            )));
        }
        Ok(())
    }
}

/// Returns true for models that require `max_completion_tokens` instead of `max_tokens`.
fn uses_max_completion_tokens(model: &str) -> bool {
    is_reasoning_model(model)
}

fn is_reasoning_model(model: &str) -> bool {
    let m = model.to_lowercase();
    m.starts_with("o1")
        || m.starts_with("o3")
        || m.starts_with("o4")
        || m.contains("gpt-5")
        || m.contains("gpt5")
}

/// Estimate cost for OpenAI models (USD per 1M tokens).
fn estimate_openai_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let (input_per_m, output_per_m) = match model {
        m if m.starts_with("gpt-5-mini") => (0.25, 2.00),
        m if m.contains("gpt-5") => (1.25, 10.00),
        m if m.starts_with("gpt-4o-mini") => (0.15, 0.60),
        m if m.starts_with("gpt-4o") => (2.50, 10.00),
        _ => (2.50, 10.00),
    };
    (input_tokens as f64 * input_per_m + output_tokens as f64 * output_per_m) / 1_000_000.0
}
