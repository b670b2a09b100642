//! Model routing: pick the provider for a model name, retry transient
//! failures with backoff, trip a per-provider breaker on repeated failures
//! and fall back to a second model.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::provider::{LlmProvider, LlmRequest, LlmResponse};
use vigil_core::{Result, VigilError};

const MAX_RETRIES: u32 = 3;
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Consecutive failures that trip a provider's breaker.
const TRIP_AFTER: u32 = 5;
/// How long a tripped provider is skipped before one trial call.
const COOL_DOWN: Duration = Duration::from_secs(60);

/// Provider error text marking a failure worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "HTTP 429",
    "HTTP 500",
    "HTTP 502",
    "HTTP 503",
    "HTTP 529",
    "timed out",
    "connection reset",
    "connection closed",
    "overloaded",
];

fn is_transient(err: &VigilError) -> bool {
    match err {
        VigilError::RateLimited { .. } => true,
        VigilError::LlmProvider(msg) => TRANSIENT_MARKERS.iter().any(|m| msg.contains(m)),
        _ => false,
    }
}

/// Once tripped, calls are refused until the cool-down passes; then a single
/// trial call either resets the breaker or trips it again.
#[derive(Debug, Default)]
struct Breaker {
    failures: u32,
    tripped_at: Option<Instant>,
    trial_in_flight: bool,
}

impl Breaker {
    fn admit(&mut self) -> bool {
        match self.tripped_at {
            None => true,
            Some(_) if self.trial_in_flight => false,
            Some(at) if at.elapsed() >= COOL_DOWN => {
                self.trial_in_flight = true;
                true
            }
            Some(_) => false,
        }
    }

    fn succeeded(&mut self) {
        *self = Self::default();
    }

    /// True when this failure (re)trips the breaker.
    fn failed(&mut self) -> bool {
        self.failures += 1;
        let trip = self.trial_in_flight || self.failures >= TRIP_AFTER;
        self.trial_in_flight = false;
        if trip {
            self.tripped_at = Some(Instant::now());
        }
        trip
    }
}

/// Sends moderation requests to the provider named by the model string.
#[derive(Clone)]
pub struct ModelRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    breakers: Arc<Mutex<HashMap<String, Breaker>>>,
    base_delay: Duration,
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRouter {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            breakers: Arc::default(),
            base_delay: BASE_DELAY,
        }
    }

    /// Override the backoff base delay (tests use a few milliseconds).
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn add_provider(&mut self, provider: Arc<dyn LlmProvider>) {
        info!(provider = provider.name(), "registered LLM provider");
        self.providers.push(provider);
    }

    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Run every provider's health check.
    pub async fn health(&self) -> Vec<(String, Result<()>)> {
        let mut results = Vec::with_capacity(self.providers.len());
        for p in &self.providers {
            results.push((p.name().to_string(), p.health_check().await));
        }
        results
    }

    /// `"openai/gpt-5-mini"` picks the provider by prefix; a bare name picks
    /// the first provider listing it.
    fn resolve(&self, model: &str) -> Option<(Arc<dyn LlmProvider>, String)> {
        if let Some((prefix, name)) = model.split_once('/')
            && let Some(p) = self
                .providers
                .iter()
                .find(|p| p.name().eq_ignore_ascii_case(prefix))
        {
            return Some((Arc::clone(p), name.to_string()));
        }
        self.providers
            .iter()
            .find(|p| p.models().iter().any(|m| m == model))
            .map(|p| (Arc::clone(p), model.to_string()))
    }

    /// Try the requested model, then `fallback_model`. The last failure is
    /// returned when neither answers.
    pub async fn complete(
        &self,
        request: &LlmRequest,
        fallback_model: Option<&str>,
    ) -> Result<LlmResponse> {
        let mut last_err = None;
        for model in std::iter::once(request.model.as_str()).chain(fallback_model) {
            let Some((provider, model_name)) = self.resolve(model) else {
                continue;
            };
            match self.call(provider.as_ref(), request, model_name).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(provider = provider.name(), model, error = %e, "model call failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| VigilError::ModelNotFound(request.model.clone())))
    }

    /// One provider, behind its breaker.
    async fn call(
        &self,
        provider: &dyn LlmProvider,
        request: &LlmRequest,
        model_name: String,
    ) -> Result<LlmResponse> {
        let name = provider.name();
        if !self.breakers.lock().entry(name.to_string()).or_default().admit() {
            return Err(VigilError::UpstreamUnavailable(format!("{name} circuit open")));
        }

        let mut req = request.clone();
        req.model = model_name;
        let result = self.with_retries(provider, &req).await;

        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry(name.to_string()).or_default();
        match result {
            Ok(_) => breaker.succeeded(),
            Err(_) => {
                if breaker.failed() {
                    warn!(
                        provider = name,
                        failures = breaker.failures,
                        cool_down_secs = COOL_DOWN.as_secs(),
                        "circuit breaker open"
                    );
                }
            }
        }
        result
    }

    async fn with_retries(&self, provider: &dyn LlmProvider, request: &LlmRequest) -> Result<LlmResponse> {
        let ceiling = self.base_delay * 2u32.pow(MAX_RETRIES);
        let mut attempt = 0;
        loop {
            let err = match provider.complete(request).await {
                Ok(resp) => {
                    debug!(
                        provider = provider.name(),
                        tokens = resp.usage.total_tokens(),
                        cost_usd = resp.usage.estimated_cost_usd,
                        "completion finished"
                    );
                    return Ok(resp);
                }
                Err(e) => e,
            };
            if attempt == MAX_RETRIES || !is_transient(&err) {
                return Err(err);
            }
            let delay = match &err {
                VigilError::RateLimited { retry_after_secs } => Duration::from_secs(*retry_after_secs),
                _ => self.base_delay * 2u32.pow(attempt),
            }
            .min(ceiling);
            warn!(
                provider = provider.name(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
