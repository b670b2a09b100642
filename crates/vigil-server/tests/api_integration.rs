//! HTTP API integration tests: every route against an in-memory store and a
//! scripted moderator.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use vigil_config::ServerConfig;
use vigil_engine::{Engine, LogNotifier};
use vigil_moderation::{ModerationVerdict, StaticModerator};
use vigil_server::{AppState, build_router};
use vigil_store::{PolicyStore, ScreenshotStore};

struct TestApp {
    router: axum::Router,
    moderator: Arc<StaticModerator>,
    _dir: tempfile::TempDir,
}

fn setup_with(moderator: StaticModerator, config: ServerConfig) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = PolicyStore::open_in_memory().unwrap();
    let shots = ScreenshotStore::open(dir.path()).unwrap();
    let moderator = Arc::new(moderator);
    let engine = Engine::new(
        store,
        Some(shots.clone()),
        moderator.clone(),
        Arc::new(LogNotifier),
        1,
    );
    TestApp {
        router: build_router(AppState::new(config, engine, Some(shots))),
        moderator,
        _dir: dir,
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        cors: false,
        api_key: None,
        ..Default::default()
    }
}

fn setup(moderator: StaticModerator) -> TestApp {
    setup_with(moderator, test_config())
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn evaluate(app: &TestApp, url: &str) -> Value {
    let (status, json) = send(app, post_json("/api/v1/evaluate", json!({ "url": url }))).await;
    assert_eq!(status, StatusCode::OK);
    json
}

// ── Health & Metrics ───────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup(StaticModerator::allowing());
    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup(StaticModerator::allowing());
    evaluate(&app, "https://example.com").await;
    let resp = app.router.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(ct.contains("text/plain"));
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("vigil_evaluations_total 1"));
}

// ── Evaluation ─────────────────────────────────────────────────

#[tokio::test]
async fn test_evaluate_allow() {
    let app = setup(StaticModerator::allowing());
    let json = evaluate(&app, "https://example.com/page").await;
    assert_eq!(json["action"], "allow");
    assert_eq!(json["appeal_enabled"], false);
}

#[tokio::test]
async fn test_evaluate_block_then_blacklist_short_circuit() {
    let app = setup(StaticModerator::blocking("Not right now"));
    let first = evaluate(&app, "https://games.com").await;
    assert_eq!(first["action"], "block");
    assert_eq!(first["reason"], "Not right now");
    assert_eq!(first["appeals_used"], 0);
    assert_eq!(first["appeal_enabled"], true);

    let second = evaluate(&app, "http://www.games.com/other").await;
    assert_eq!(second["action"], "block");
    assert_eq!(app.moderator.page_calls(), 1);

    let (_, list) = send(&app, get("/api/v1/blacklist")).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["identifier"], "games.com");
}

#[tokio::test]
async fn test_evaluate_fail_closed() {
    let app = setup(StaticModerator::unavailable());
    let json = evaluate(&app, "https://unknown.com").await;
    assert_eq!(json["action"], "block");
    assert_eq!(json["reason"], vigil_engine::FAIL_CLOSED_REASON);
    assert_eq!(json["appeal_enabled"], false);
}

#[tokio::test]
async fn test_evaluate_missing_url_is_400() {
    let app = setup(StaticModerator::allowing());
    let (status, json) = send(&app, post_json("/api/v1/evaluate", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation");
    assert!(json["message"].is_string());
}

#[tokio::test]
async fn test_desktop_evaluate_with_screenshot() {
    let app = setup(StaticModerator::blocking("No games"));
    // "iVBORw0K" is the base64 of the PNG signature prefix.
    let (status, json) = send(
        &app,
        post_json(
            "/api/v1/desktop/evaluate",
            json!({
                "app_name": "Steam.exe",
                "window_title": "Store",
                "screenshot": "data:image/png;base64,iVBORw0K",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["action"], "block");

    let (_, list) = send(&app, get("/api/v1/desktop/blacklist")).await;
    let reference = list[0]["screenshot_ref"].as_str().unwrap().to_string();

    let resp = app
        .router
        .clone()
        .oneshot(get(&format!("/api/v1/desktop/screenshots/{reference}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/png");
}

#[tokio::test]
async fn test_desktop_evaluate_bad_base64_is_400() {
    let app = setup(StaticModerator::allowing());
    let (status, _) = send(
        &app,
        post_json(
            "/api/v1/desktop/evaluate",
            json!({ "app_name": "steam", "screenshot": "%%%" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Appeals ────────────────────────────────────────────────────

#[tokio::test]
async fn test_appeal_ai_denied_then_second_appeal_conflict() {
    let app = setup(StaticModerator::blocking("Blocked"));
    evaluate(&app, "https://games.com").await;

    let body = json!({ "url": "https://games.com", "appeal_reason": "homework" });
    let (status, json) = send(&app, post_json("/api/v1/appeals", body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ai_denied");
    assert!(json["appeal_id"].is_string());
    assert_eq!(json["reload"], false);

    let (status, json) = send(&app, post_json("/api/v1/appeals", body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "conflict");
}

#[tokio::test]
async fn test_appeal_ai_approved() {
    let app = setup(
        StaticModerator::blocking("Blocked")
            .then(ModerationVerdict::block("Blocked"))
            .then(ModerationVerdict::allow("OK for school")),
    );
    evaluate(&app, "https://wiki.org").await;
    let (status, json) = send(
        &app,
        post_json(
            "/api/v1/appeals",
            json!({ "url": "https://wiki.org", "appeal_reason": "school" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "approved");
    assert_eq!(json["reload"], true);

    assert_eq!(evaluate(&app, "https://wiki.org").await["action"], "allow");
}

#[tokio::test]
async fn test_appeal_unknown_resource_is_404() {
    let app = setup(StaticModerator::allowing());
    let (status, _) = send(
        &app,
        post_json(
            "/api/v1/appeals",
            json!({ "url": "https://nowhere.com", "appeal_reason": "please" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_escalate_and_parent_approve() {
    let app = setup(StaticModerator::blocking("Blocked"));
    evaluate(&app, "https://games.com").await;
    let (_, appeal) = send(
        &app,
        post_json(
            "/api/v1/appeals",
            json!({ "url": "https://games.com", "appeal_reason": "homework" }),
        ),
    )
    .await;
    let id = appeal["appeal_id"].as_str().unwrap().to_string();

    let (_, pending) = send(&app, get("/api/v1/appeals/pending")).await;
    assert!(pending.as_array().unwrap().is_empty());

    let (status, json) = send(
        &app,
        post_json(
            &format!("/api/v1/appeals/{id}/escalate"),
            json!({ "url": "https://games.com", "appeal_reason": "really" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "pending_parent");

    let (_, pending) = send(&app, get("/api/v1/appeals/pending")).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["escalated_from_ai"], true);

    let (status, json) = send(&app, post_json(&format!("/api/v1/appeals/{id}/approve"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "parent_approved");

    let calls = app.moderator.total_calls();
    assert_eq!(evaluate(&app, "https://games.com").await["action"], "allow");
    assert_eq!(app.moderator.total_calls(), calls);

    let (status, _) = send(&app, post_json(&format!("/api/v1/appeals/{id}/deny"), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, history) = send(&app, get("/api/v1/appeals?resource=games.com")).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_email_link_resolves_without_api_key() {
    let app = setup_with(
        StaticModerator::blocking("Blocked"),
        ServerConfig {
            api_key: Some("parent-key".into()),
            ..test_config()
        },
    );
    let authed = |mut req: Request<Body>| {
        req.headers_mut()
            .insert("authorization", "Bearer parent-key".parse().unwrap());
        req
    };
    send(&app, authed(post_json("/api/v1/evaluate", json!({ "url": "https://games.com" })))).await;
    let (_, appeal) = send(
        &app,
        authed(post_json(
            "/api/v1/appeals",
            json!({ "url": "https://games.com", "appeal_reason": "homework" }),
        )),
    )
    .await;
    let id = appeal["appeal_id"].as_str().unwrap().to_string();
    let (status, _) = send(
        &app,
        authed(post_json(&format!("/api/v1/appeals/{id}/escalate"), json!({ "url": "https://games.com" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let resp = app
        .router
        .clone()
        .oneshot(get(&format!("/respond/{id}/approve")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&body).contains("games.com is now allowed"));

    let json = send(&app, authed(post_json("/api/v1/evaluate", json!({ "url": "https://games.com" })))).await.1;
    assert_eq!(json["action"], "allow");

    // Clicking the other link afterwards changes nothing.
    let resp = app
        .router
        .clone()
        .oneshot(get(&format!("/respond/{id}/deny")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let resp = app
        .router
        .clone()
        .oneshot(get(&format!("/respond/{}/approve", uuid::Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = app
        .router
        .clone()
        .oneshot(get(&format!("/respond/{id}/maybe")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_escalate_wrong_url_is_400() {
    let app = setup(StaticModerator::blocking("Blocked"));
    evaluate(&app, "https://games.com").await;
    let (_, appeal) = send(
        &app,
        post_json(
            "/api/v1/appeals",
            json!({ "url": "https://games.com", "appeal_reason": "homework" }),
        ),
    )
    .await;
    let id = appeal["appeal_id"].as_str().unwrap();
    let (status, _) = send(
        &app,
        post_json(
            &format!("/api/v1/appeals/{id}/escalate"),
            json!({ "url": "https://other.com" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_approval_bad_uuid() {
    let app = setup(StaticModerator::allowing());
    let (status, _) = send(&app, post_json("/api/v1/appeals/not-a-uuid/approve", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_approval_not_found() {
    let app = setup(StaticModerator::allowing());
    let fake_id = uuid::Uuid::new_v4();
    let (status, json) = send(
        &app,
        post_json(&format!("/api/v1/appeals/{fake_id}/approve"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

// ── Lists ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_add_move_remove() {
    let app = setup(StaticModerator::allowing());
    let (status, entry) = send(
        &app,
        post_json("/api/v1/blacklist", json!({ "url": "https://www.Reddit.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["identifier"], "reddit.com");

    send(&app, post_json("/api/v1/whitelist", json!({ "identifier": "reddit.com" }))).await;
    let (_, black) = send(&app, get("/api/v1/blacklist")).await;
    let (_, white) = send(&app, get("/api/v1/whitelist")).await;
    assert!(black.as_array().unwrap().is_empty());
    assert_eq!(white.as_array().unwrap().len(), 1);

    let del = Request::delete("/api/v1/whitelist/reddit.com")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, del).await;
    assert_eq!(status, StatusCode::OK);

    let del = Request::delete("/api/v1/whitelist/reddit.com")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, del).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_desktop_approve_is_idempotent() {
    let app = setup(StaticModerator::blocking("No"));
    send(
        &app,
        post_json("/api/v1/desktop/evaluate", json!({ "app_name": "roblox" })),
    )
    .await;

    for _ in 0..2 {
        let (status, json) =
            send(&app, post_json("/api/v1/desktop/apps/Roblox/approve", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["list"], "whitelist");
    }
    let (_, black) = send(&app, get("/api/v1/desktop/blacklist")).await;
    let (_, white) = send(&app, get("/api/v1/desktop/whitelist")).await;
    assert!(black.as_array().unwrap().is_empty());
    assert_eq!(white.as_array().unwrap().len(), 1);
}

// ── Settings & audit ───────────────────────────────────────────

#[tokio::test]
async fn test_settings_roundtrip() {
    let app = setup(StaticModerator::allowing());
    let (status, current) = send(&app, get("/api/v1/settings")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current["agent_can_auto_approve"], true);
    let version = current["version"].as_u64().unwrap();

    let req = Request::put("/api/v1/settings")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "parent_email": "parent@example.com",
                "monitoring_prompt": "No games",
                "agent_can_auto_approve": false,
                "expected_version": version,
            })
            .to_string(),
        ))
        .unwrap();
    let (status, saved) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["agent_can_auto_approve"], false);
    assert_eq!(saved["version"].as_u64().unwrap(), version + 1);

    let (_, audit) = send(&app, get("/api/v1/audit?limit=5")).await;
    assert_eq!(audit[0]["event_type"], "settings_saved");
}

#[tokio::test]
async fn test_settings_missing_email_is_400() {
    let app = setup(StaticModerator::allowing());
    let req = Request::put("/api/v1/settings")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "parent_email": "",
                "monitoring_prompt": "x",
                "agent_can_auto_approve": true,
            })
            .to_string(),
        ))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Auth & rate limiting ───────────────────────────────────────

#[tokio::test]
async fn test_api_key_rejects_unauthenticated() {
    let app = setup_with(
        StaticModerator::allowing(),
        ServerConfig {
            api_key: Some("test-secret-key".into()),
            ..test_config()
        },
    );

    let (status, json) = send(&app, get("/api/v1/settings")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");

    let req = Request::get("/api/v1/settings")
        .header("authorization", "Bearer wrong-key")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, req).await.0, StatusCode::UNAUTHORIZED);

    let req = Request::get("/api/v1/settings")
        .header("authorization", "Bearer test-secret-key")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, req).await.0, StatusCode::OK);

    // Health stays open without a key.
    assert_eq!(send(&app, get("/health")).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let app = setup_with(
        StaticModerator::allowing(),
        ServerConfig {
            rate_limit_burst: 2,
            rate_limit_per_sec: 0.0,
            ..test_config()
        },
    );
    assert_eq!(send(&app, get("/api/v1/settings")).await.0, StatusCode::OK);
    assert_eq!(send(&app, get("/api/v1/settings")).await.0, StatusCode::OK);
    let (status, json) = send(&app, get("/api/v1/settings")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"], "rate_limited");
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let app = setup(StaticModerator::allowing());
    let (status, _) = send(&app, get("/api/v1/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
