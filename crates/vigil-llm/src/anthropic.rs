use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};
use vigil_core::{Message, MessageContent, Result, Role, VigilError};

use crate::provider::*;

/// Anthropic Claude API provider.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.anthropic.com/v1".into(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub(crate) fn build_request_body(&self, request: &LlmRequest) -> serde_json::Value {
        let mut system_parts: Vec<String> = request.system.iter().cloned().collect();
        let mut messages = Vec::new();
        for msg in &request.messages {
            let role = match msg.role {
                // Anthropic takes system text in the top-level "system" field
                Role::System => {
                    system_parts.push(msg.text_content());
                    continue;
                }
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let blocks: Vec<serde_json::Value> = msg
                .content
                .iter()
                .map(|block| match block {
                    MessageContent::Text { text } => serde_json::json!({
                        "type": "text",
                        "text": text,
                    }),
                    MessageContent::Image { data, media_type } => serde_json::json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": media_type,
                            "data": data,
                        },
                    }),
                })
                .collect();
            messages.push(serde_json::json!({
                "role": role,
                "content": blocks,
            }));
        }

        let mut body = serde_json::json!({
            "model": &request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });

        if !system_parts.is_empty() {
            body["system"] = serde_json::json!(system_parts.join("\n\n"));
        }

        body
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn models(&self) -> Vec<String> {
        vec![
            "claude-sonnet-4-20250514".into(),
            "claude-haiku-3-5".into(),
        ]
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.build_request_body(request);
        debug!(model = %request.model, "sending Anthropic API request");

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| VigilError::LlmProvider(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(VigilError::RateLimited {
                    retry_after_secs: 30,
                });
            }
            return Err(VigilError::LlmProvider(format!("HTTP {status}: {text}")));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| VigilError::LlmProvider(e.to_string()))?;

        let content_text = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let stop_reason = match data["stop_reason"].as_str() {
            Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        };

        let usage_data = &data["usage"];
        let input_tokens = usage_data["input_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = usage_data["output_tokens"].as_u64().unwrap_or(0) as u32;

        Ok(LlmResponse {
            message: Message::text(Role::Assistant, content_text),
            usage: Usage {
                input_tokens,
                output_tokens,
                estimated_cost_usd: estimate_anthropic_cost(
                    &request.model,
                    input_tokens,
                    output_tokens,
                ),
            },
            stop_reason,
        })
    }

    async fn health_check(&self) -> Result<()> {
        info!("checking Anthropic API health");
        if self.api_key.is_empty() {
            return Err(VigilError::LlmProvider("ANTHROPIC_API_KEY not set".into()));
        }
        Ok(())
    }
}

/// Estimate cost for Anthropic models (USD per 1M tokens).
fn estimate_anthropic_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let (input_per_m, output_per_m) = match model {
        m if m.contains("opus") => (15.00, 75.00),
        m if m.contains("sonnet") => (3.00, 15.00),
        m if m.contains("haiku") => (0.80, 4.00),
        _ => (3.00, 15.00),
    };
    (input_tokens as f64 * input_per_m + output_tokens as f64 * output_per_m) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_block_and_system_field() {
        let provider = AnthropicProvider::new("key".into());
        let mut req = LlmRequest::new(
            "claude-haiku-3-5",
            vec![
                Message::text(Role::System, "extra rules"),
                Message::text(Role::User, "review this").with_image("aGk=", "image/png"),
            ],
        );
        req.system = Some("You are a moderator".into());
        let body = provider.build_request_body(&req);

        assert_eq!(body["system"], "You are a moderator\n\nextra rules");
        let blocks = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(blocks[1]["type"], "image");
        assert_eq!(blocks[1]["source"]["media_type"], "image/png");
    }

    #[test]
    fn test_cost_estimate() {
        assert!(estimate_anthropic_cost("claude-haiku-3-5", 1_000_000, 0) < 1.0);
    }
}
