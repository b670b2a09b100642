//! `/api/v1` handlers.
//!
//! Work that mutates state runs on its own task so a disconnecting client
//! cannot cancel it halfway.

use axum::{
    Router,
    body::Body,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{Html, Json, Response},
    routing::{delete, get, post},
};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use vigil_core::{
    AppealOutcome, AppealRecord, ApprovalId, AuditEvent, Decision, EscalationOutcome, ListKind,
    ParentSettings, PolicyEntry, ResourceKind, SettingsUpdate, Verdict, normalize_domain,
};
use vigil_engine::{AppRequest, AppealRequest, WebsiteRequest};

use crate::AppState;
use crate::error::ApiError;

type ApiResult<T> = Result<Json<T>, ApiError>;
type Shared = State<Arc<AppState>>;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/evaluate", post(evaluate_website))
        .route("/desktop/evaluate", post(evaluate_app))
        .route("/appeals", post(submit_appeal).get(list_appeals))
        .route("/appeals/pending", get(pending_appeals))
        .route("/appeals/{id}/escalate", post(escalate_appeal))
        .route("/appeals/{id}/approve", post(approve_appeal))
        .route("/appeals/{id}/deny", post(deny_appeal))
        .route("/desktop/apps/{app}/approve", post(approve_app))
        .route("/desktop/screenshots/{reference}", get(screenshot))
        .route("/settings", get(get_settings).put(save_settings))
        .route("/audit", get(audit_log))
        .merge(list_routes(ResourceKind::Website))
        .nest("/desktop", list_routes(ResourceKind::DesktopApp))
}

/// `GET/POST /{list}` and `DELETE /{list}/{identifier}` for one resource kind.
fn list_routes(kind: ResourceKind) -> Router<Arc<AppState>> {
    let mut router = Router::new();
    for list in [ListKind::Whitelist, ListKind::Blacklist] {
        let path = format!("/{}", list.as_str());
        router = router
            .route(
                &path,
                get(move |State(state): Shared| list_entries(state, kind, list)).post(
                    move |State(state): Shared, body: Result<Json<AddEntryBody>, JsonRejection>| {
                        add_entry(state, kind, list, body)
                    },
                ),
            )
            .route(
                &format!("{path}/{{identifier}}"),
                delete(move |State(state): Shared, Path(identifier): Path<String>| {
                    remove_entry(state, kind, list, identifier)
                }),
            );
    }
    router
}

/// Run `work` on its own task and wait for it.
async fn detached<T, F>(work: F) -> Result<T, ApiError>
where
    F: Future<Output = vigil_core::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError::internal(format!("request task failed: {e}"))),
    }
}

fn parse_approval_id(raw: &str) -> Result<ApprovalId, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("'{raw}' is not an approval id")))
}

// ── Evaluation ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EvaluateBody {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DesktopEvaluateBody {
    pub app_name: String,
    #[serde(default)]
    pub window_title: Option<String>,
    /// Base64 PNG, optionally as a `data:` URL.
    #[serde(default)]
    pub screenshot: Option<String>,
}

async fn evaluate_website(
    State(state): Shared,
    body: Result<Json<EvaluateBody>, JsonRejection>,
) -> ApiResult<Decision> {
    let Json(body) = body?;
    let decisions = state.engine.decisions.clone();
    let request = WebsiteRequest {
        url: body.url,
        title: body.title,
        content: body.content,
    };
    let decision = detached(async move { decisions.evaluate_website(&request).await }).await?;
    state.metrics.record_decision(&decision);
    Ok(Json(decision))
}

async fn evaluate_app(
    State(state): Shared,
    body: Result<Json<DesktopEvaluateBody>, JsonRejection>,
) -> ApiResult<Decision> {
    let Json(body) = body?;
    let screenshot = body
        .screenshot
        .as_deref()
        .map(decode_screenshot)
        .transpose()?;
    let decisions = state.engine.decisions.clone();
    let request = AppRequest {
        app_name: body.app_name,
        window_title: body.window_title,
        screenshot,
    };
    let decision = detached(async move { decisions.evaluate_app(&request).await }).await?;
    state.metrics.record_decision(&decision);
    Ok(Json(decision))
}

fn decode_screenshot(raw: &str) -> Result<Vec<u8>, ApiError> {
    let data = match raw.split_once(";base64,") {
        Some((_, data)) => data,
        None => raw,
    };
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ApiError::bad_request(format!("screenshot is not valid base64: {e}")))
}

// ── Appeals ────────────────────────────────────────────────────

fn default_kind() -> ResourceKind {
    ResourceKind::Website
}

#[derive(Debug, Deserialize)]
pub struct AppealBody {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub appeal_reason: String,
    #[serde(default = "default_kind")]
    pub kind: ResourceKind,
}

#[derive(Debug, Deserialize)]
pub struct EscalateBody {
    pub url: String,
    #[serde(default)]
    pub appeal_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppealsQuery {
    #[serde(default)]
    pub resource: Option<String>,
}

async fn submit_appeal(
    State(state): Shared,
    body: Result<Json<AppealBody>, JsonRejection>,
) -> ApiResult<AppealOutcome> {
    let Json(body) = body?;
    let appeals = state.engine.appeals.clone();
    let request = AppealRequest {
        kind: body.kind,
        resource_link: body.url,
        title: body.title,
        reason: body.appeal_reason,
    };
    let outcome = detached(async move { appeals.submit(&request).await }).await?;
    state.metrics.record_appeal(outcome.status);
    Ok(Json(outcome))
}

async fn escalate_appeal(
    State(state): Shared,
    Path(id): Path<String>,
    body: Result<Json<EscalateBody>, JsonRejection>,
) -> ApiResult<EscalationOutcome> {
    let id = parse_approval_id(&id)?;
    let Json(body) = body?;
    let appeals = state.engine.appeals.clone();
    let outcome = detached(async move {
        appeals
            .escalate(&id, &body.url, body.appeal_reason.as_deref())
            .await
    })
    .await?;
    state.metrics.inc_appeals_escalated();
    Ok(Json(outcome))
}

async fn list_appeals(
    State(state): Shared,
    query: Result<Query<AppealsQuery>, QueryRejection>,
) -> ApiResult<Vec<AppealRecord>> {
    let Query(query) = query?;
    let resource = query
        .resource
        .map(|r| normalize_domain(&r).unwrap_or_else(|_| r.trim().to_lowercase()));
    Ok(Json(state.engine.store.list_appeals(resource.as_deref())?))
}

async fn pending_appeals(State(state): Shared) -> ApiResult<Vec<AppealRecord>> {
    Ok(Json(state.engine.store.pending_appeals()?))
}

async fn approve_appeal(State(state): Shared, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    resolve_appeal(state, &id, Verdict::Approve).await
}

async fn deny_appeal(State(state): Shared, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    resolve_appeal(state, &id, Verdict::Deny).await
}

async fn resolve_appeal(
    state: Arc<AppState>,
    id: &str,
    verdict: Verdict,
) -> ApiResult<serde_json::Value> {
    let id = parse_approval_id(id)?;
    let appeals = state.engine.appeals.clone();
    let record = detached(async move { appeals.resolve(&id, verdict).await }).await?;
    state.metrics.inc_verdicts(verdict == Verdict::Approve);
    Ok(Json(json!({
        "status": record.state,
        "approval_id": record.approval_id,
        "resource": record.resource,
    })))
}

/// Approve and deny links from the parent's email. These live outside the API
/// key; knowing the approval id is enough.
pub(crate) fn link_routes() -> Router<Arc<AppState>> {
    Router::new().route("/respond/{id}/{decision}", get(respond_by_link))
}

async fn respond_by_link(
    State(state): Shared,
    Path((id, decision)): Path<(String, String)>,
) -> (StatusCode, Html<String>) {
    let verdict = match decision.as_str() {
        "approve" => Verdict::Approve,
        "deny" => Verdict::Deny,
        _ => return link_page(StatusCode::NOT_FOUND, "Unknown link", "This link is not valid."),
    };
    let Ok(id) = Uuid::parse_str(&id) else {
        return link_page(StatusCode::NOT_FOUND, "Unknown link", "This link is not valid.");
    };

    let appeals = state.engine.appeals.clone();
    match detached(async move { appeals.resolve(&id, verdict).await }).await {
        Ok(record) => {
            state.metrics.inc_verdicts(verdict == Verdict::Approve);
            let (title, body) = match verdict {
                Verdict::Approve => ("Approved", format!("{} is now allowed.", record.resource)),
                Verdict::Deny => ("Denied", format!("{} stays blocked.", record.resource)),
            };
            link_page(StatusCode::OK, title, &body)
        }
        Err(e) => link_page(e.status, "Could not apply your answer", &e.message),
    }
}

fn link_page(status: StatusCode, title: &str, body: &str) -> (StatusCode, Html<String>) {
    let escape = |text: &str| {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
    };
    (
        status,
        Html(format!(
            "<!doctype html><title>Vigil</title><h1>{}</h1><p>{}</p>",
            escape(title),
            escape(body)
        )),
    )
}

// ── Lists ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddEntryBody {
    #[serde(alias = "url", alias = "app_name", alias = "domain")]
    pub identifier: String,
    #[serde(default)]
    pub reason: Option<String>,
}

async fn list_entries(
    state: Arc<AppState>,
    kind: ResourceKind,
    list: ListKind,
) -> ApiResult<Vec<PolicyEntry>> {
    Ok(Json(state.engine.store.list_entries(kind, list)?))
}

async fn add_entry(
    state: Arc<AppState>,
    kind: ResourceKind,
    list: ListKind,
    body: Result<Json<AddEntryBody>, JsonRejection>,
) -> ApiResult<PolicyEntry> {
    let Json(body) = body?;
    let policy = state.engine.policy.clone();
    let entry = detached(async move {
        policy
            .add(kind, list, &body.identifier, body.reason.as_deref())
            .await
    })
    .await?;
    Ok(Json(entry))
}

async fn remove_entry(
    state: Arc<AppState>,
    kind: ResourceKind,
    list: ListKind,
    identifier: String,
) -> ApiResult<serde_json::Value> {
    let policy = state.engine.policy.clone();
    let removed = identifier.clone();
    detached(async move { policy.remove(kind, list, &identifier).await }).await?;
    Ok(Json(json!({ "status": "removed", "identifier": removed })))
}

async fn approve_app(State(state): Shared, Path(app): Path<String>) -> ApiResult<PolicyEntry> {
    let appeals = state.engine.appeals.clone();
    Ok(Json(
        detached(async move { appeals.approve_app(&app).await }).await?,
    ))
}

// ── Settings, screenshots, audit ───────────────────────────────

async fn get_settings(State(state): Shared) -> ApiResult<ParentSettings> {
    Ok(Json(state.engine.store.settings()?))
}

async fn save_settings(
    State(state): Shared,
    body: Result<Json<SettingsUpdate>, JsonRejection>,
) -> ApiResult<ParentSettings> {
    let Json(update) = body?;
    let store = state.engine.store.clone();
    let saved = detached(async move {
        let saved = store.save_settings(&update)?;
        store.audit("settings_saved", None, Some(&format!("version {}", saved.version)))?;
        Ok::<_, vigil_core::VigilError>(saved)
    })
    .await?;
    debug!(version = saved.version, "settings saved");
    Ok(Json(saved))
}

async fn screenshot(
    State(state): Shared,
    Path(reference): Path<String>,
) -> Result<Response, ApiError> {
    let shots = state
        .screenshots
        .as_ref()
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "not_found", "screenshots are disabled"))?;
    let bytes = shots.get(reference.trim_end_matches(".png"))?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CACHE_CONTROL, "private, max-age=86400")
        .body(Body::from(bytes))
        .map_err(|e| ApiError::internal(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

async fn audit_log(
    State(state): Shared,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> ApiResult<Vec<AuditEvent>> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(state.audit_page_size).min(1000);
    Ok(Json(state.engine.store.audit_log(limit)?))
}
