use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use vigil_config::{ModerationConfig, ServicesConfig, SharedConfig, VigilConfig};
use vigil_core::{Message, Result, Role, VigilError};
use vigil_llm::{AnthropicProvider, LlmRequest, ModelRouter, OpenAiProvider};

use crate::moderator::{AppReview, AppealReview, Moderator, PageReview};
use crate::prompts;
use crate::verdict::{ModerationVerdict, parse_verdict};

/// Build a router with every provider that has credentials configured.
pub fn router_from_config(services: &ServicesConfig) -> ModelRouter {
    let mut router = ModelRouter::new();
    if let Some(ref key) = services.anthropic_api_key {
        router.add_provider(Arc::new(AnthropicProvider::new(key.clone())));
    }
    match (&services.openai_api_key, &services.openai_base_url) {
        (key, Some(base_url)) => {
            router.add_provider(Arc::new(
                OpenAiProvider::new(key.clone().unwrap_or_default())
                    .with_base_url(base_url.clone(), "openai".into()),
            ));
        }
        (Some(key), None) => {
            router.add_provider(Arc::new(OpenAiProvider::new(key.clone())));
        }
        (None, None) => {}
    }
    if !router.has_providers() {
        warn!("no LLM provider configured; moderation calls will fail closed");
    }
    router
}

/// Moderator backed by a language model.
///
/// The `[moderation]` section is read on every call, so a config reload
/// changes the model, limits and timeout of the next review.
pub struct LlmModerator {
    router: ModelRouter,
    config: SharedConfig,
}

impl LlmModerator {
    /// A moderator with fixed settings.
    pub fn new(router: ModelRouter, moderation: ModerationConfig) -> Self {
        Self::live(
            router,
            SharedConfig::new(VigilConfig {
                moderation,
                ..VigilConfig::default()
            }),
        )
    }

    /// A moderator that follows a reloading config.
    pub fn live(router: ModelRouter, config: SharedConfig) -> Self {
        config.read(|c| {
            info!(model = %c.moderation.model, providers = ?router.provider_names(), "LLM moderator ready");
        });
        Self { router, config }
    }

    fn settings(&self) -> ModerationConfig {
        self.config.read(|c| c.moderation.clone())
    }

    fn request(settings: &ModerationConfig, system: &str, message: Message) -> LlmRequest {
        let mut req = LlmRequest::new(settings.model.clone(), vec![message]);
        req.system = Some(system.to_string());
        req.max_tokens = settings.max_tokens;
        req.temperature = settings.temperature;
        req.json_mode = true;
        req
    }

    /// One model call bounded by `moderation.timeout_secs`, parsed into a verdict.
    async fn ask(
        &self,
        kind: &'static str,
        settings: &ModerationConfig,
        request: LlmRequest,
    ) -> Result<ModerationVerdict> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let call = self
            .router
            .complete(&request, settings.fallback_model.as_deref());

        let response = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                warn!(review = kind, error = %e, "moderation call failed");
                return Err(match e {
                    VigilError::ModelNotFound(m) => {
                        VigilError::UpstreamUnavailable(format!("no provider for model {m}"))
                    }
                    other => other,
                });
            }
            Err(_) => {
                warn!(review = kind, timeout_secs = timeout.as_secs(), "moderation call timed out");
                return Err(VigilError::UpstreamUnavailable(format!(
                    "moderation timed out after {}s",
                    timeout.as_secs()
                )));
            }
        };

        let verdict = parse_verdict(&response.text())?;
        debug!(review = kind, action = ?verdict.action, "moderation verdict");
        Ok(verdict)
    }
}

#[async_trait]
impl Moderator for LlmModerator {
    async fn review_page(&self, page: &PageReview) -> Result<ModerationVerdict> {
        let settings = self.settings();
        let text = prompts::page_prompt(page, settings.content_char_limit);
        let req = Self::request(&settings, prompts::PAGE_SYSTEM_PROMPT, Message::text(Role::User, text));
        self.ask("page", &settings, req).await
    }

    async fn review_app(&self, app: &AppReview) -> Result<ModerationVerdict> {
        let mut message = Message::text(Role::User, prompts::app_prompt(app));
        if let Some(ref png) = app.screenshot {
            let encoded = base64::engine::general_purpose::STANDARD.encode(png);
            message = message.with_image(encoded, "image/png");
        }
        let settings = self.settings();
        let req = Self::request(&settings, prompts::APP_SYSTEM_PROMPT, message);
        self.ask("app", &settings, req).await
    }

    async fn review_appeal(&self, appeal: &AppealReview) -> Result<ModerationVerdict> {
        let text = prompts::appeal_prompt(appeal);
        let settings = self.settings();
        let req = Self::request(&settings, prompts::APPEAL_SYSTEM_PROMPT, Message::text(Role::User, text));
        self.ask("appeal", &settings, req).await
    }
}
