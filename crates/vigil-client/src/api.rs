//! Typed HTTP client for the `/api/v1` surface.

use base64::Engine as _;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use vigil_core::{
    AppealOutcome, AppealRecord, ApprovalId, AuditEvent, Decision, EscalationOutcome, ListKind,
    ParentSettings, PolicyEntry, ResourceKind, Result, SettingsUpdate, VigilError,
};

/// A page as the enforcement point sees it, content already extracted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageCheck {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// The foreground app as the desktop monitor sees it.
#[derive(Debug, Clone, Default)]
pub struct AppCheck {
    pub app_name: String,
    pub window_title: Option<String>,
    pub screenshot_png: Option<Vec<u8>>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| VigilError::Config(format!("invalid server url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(VigilError::Config(format!(
                "server url '{base_url}' cannot carry a path"
            )));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| VigilError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v1"]).extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let req = self.http.request(method, self.url(segments));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req
            .send()
            .await
            .map_err(|e| VigilError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| VigilError::Transport(format!("unreadable response: {e}")))
    }

    // ── Enforcement ────────────────────────────────────────────

    pub async fn evaluate(&self, page: &PageCheck) -> Result<Decision> {
        self.send(self.request(Method::POST, &["evaluate"]).json(page))
            .await
    }

    pub async fn evaluate_app(&self, app: &AppCheck) -> Result<Decision> {
        let screenshot = app
            .screenshot_png
            .as_ref()
            .map(|png| base64::engine::general_purpose::STANDARD.encode(png));
        let body = json!({
            "app_name": app.app_name,
            "window_title": app.window_title,
            "screenshot": screenshot,
        });
        self.send(self.request(Method::POST, &["desktop", "evaluate"]).json(&body))
            .await
    }

    pub async fn submit_appeal(
        &self,
        kind: ResourceKind,
        url: &str,
        title: Option<&str>,
        reason: &str,
    ) -> Result<AppealOutcome> {
        let body = json!({
            "url": url,
            "title": title,
            "appeal_reason": reason,
            "kind": kind,
        });
        self.send(self.request(Method::POST, &["appeals"]).json(&body))
            .await
    }

    pub async fn escalate(
        &self,
        approval_id: &ApprovalId,
        url: &str,
        reason: Option<&str>,
    ) -> Result<EscalationOutcome> {
        let id = approval_id.to_string();
        let body = json!({ "url": url, "appeal_reason": reason });
        self.send(
            self.request(Method::POST, &["appeals", &id, "escalate"])
                .json(&body),
        )
        .await
    }

    // ── Oversight ──────────────────────────────────────────────

    pub async fn pending_appeals(&self) -> Result<Vec<AppealRecord>> {
        self.send(self.request(Method::GET, &["appeals", "pending"]))
            .await
    }

    pub async fn appeals(&self, resource: Option<&str>) -> Result<Vec<AppealRecord>> {
        let mut req = self.request(Method::GET, &["appeals"]);
        if let Some(resource) = resource {
            req = req.query(&[("resource", resource)]);
        }
        self.send(req).await
    }

    pub async fn approve(&self, approval_id: &ApprovalId) -> Result<serde_json::Value> {
        let id = approval_id.to_string();
        self.send(self.request(Method::POST, &["appeals", &id, "approve"]))
            .await
    }

    pub async fn deny(&self, approval_id: &ApprovalId) -> Result<serde_json::Value> {
        let id = approval_id.to_string();
        self.send(self.request(Method::POST, &["appeals", &id, "deny"]))
            .await
    }

    pub async fn entries(&self, kind: ResourceKind, list: ListKind) -> Result<Vec<PolicyEntry>> {
        self.send(self.request(Method::GET, &list_path(kind, list, None)))
            .await
    }

    pub async fn add_entry(
        &self,
        kind: ResourceKind,
        list: ListKind,
        identifier: &str,
        reason: Option<&str>,
    ) -> Result<PolicyEntry> {
        let body = json!({ "identifier": identifier, "reason": reason });
        self.send(
            self.request(Method::POST, &list_path(kind, list, None))
                .json(&body),
        )
        .await
    }

    pub async fn remove_entry(
        &self,
        kind: ResourceKind,
        list: ListKind,
        identifier: &str,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .send(self.request(Method::DELETE, &list_path(kind, list, Some(identifier))))
            .await?;
        Ok(())
    }

    pub async fn approve_app(&self, app: &str) -> Result<PolicyEntry> {
        self.send(self.request(Method::POST, &["desktop", "apps", app, "approve"]))
            .await
    }

    pub async fn settings(&self) -> Result<ParentSettings> {
        self.send(self.request(Method::GET, &["settings"])).await
    }

    pub async fn save_settings(&self, update: &SettingsUpdate) -> Result<ParentSettings> {
        self.send(self.request(Method::PUT, &["settings"]).json(update))
            .await
    }

    pub async fn audit(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        self.send(
            self.request(Method::GET, &["audit"])
                .query(&[("limit", limit)]),
        )
        .await
    }

    /// `GET /health`, outside the API prefix.
    pub async fn health(&self) -> Result<serde_json::Value> {
        let url = self
            .base_url
            .join("health")
            .map_err(|e| VigilError::Config(e.to_string()))?;
        self.send(self.http.get(url)).await
    }
}

fn list_path<'a>(kind: ResourceKind, list: ListKind, identifier: Option<&'a str>) -> Vec<&'a str> {
    let mut path = Vec::with_capacity(3);
    if kind == ResourceKind::DesktopApp {
        path.push("desktop");
    }
    path.push(list.as_str());
    path.extend(identifier);
    path
}

/// Turn a non-2xx response into the matching [`VigilError`].
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let text = resp.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error, body.message),
        Err(_) => (String::new(), text),
    };
    debug!(%status, code = %code, "api error");

    Err(match status {
        StatusCode::BAD_REQUEST => VigilError::validation("request", message),
        StatusCode::NOT_FOUND => VigilError::NotFound(message),
        StatusCode::CONFLICT => VigilError::Conflict(message),
        StatusCode::TOO_MANY_REQUESTS => VigilError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(1),
        },
        StatusCode::SERVICE_UNAVAILABLE => VigilError::UpstreamUnavailable(message),
        _ => VigilError::Transport(format!("HTTP {status}: {message}")),
    })
}
