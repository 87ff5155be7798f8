//! API integration tests for loadwatch-api routes.
//!
//! Requests go straight to the router through `tower::ServiceExt`, so no TCP
//! socket is bound.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use loadwatch_api::app::build_app;
use loadwatch_api::state::AppState;
use loadwatch_core::ProxyConfig;

fn app() -> axum::Router {
    build_app(AppState::new())
}

async fn body_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(b) = body {
        builder.body(Body::from(serde_json::to_vec(&b).unwrap())).unwrap()
    } else {
        builder.body(Body::empty()).unwrap()
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    (status, body_json(resp.into_body()).await)
}

async fn create_session(app: &axum::Router, body: Value) -> String {
    let (status, body) = send(app, json_request("POST", "/api/v1/sessions", Some(body))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_returns_ok() {
    let resp = app().oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp.into_body()).await, "ok");
}

#[tokio::test]
async fn unknown_route_returns_json_404() {
    let (status, body) = send(&app(), get("/api/v1/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn metrics_report_session_state() {
    let app = app();
    let id = create_session(&app, json!({ "label": "ch \"1\"" })).await;

    let resp = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(ct.contains("openmetrics-text"));

    let text = body_text(resp.into_body()).await;
    assert!(text.contains(&format!(
        "loadwatch_session_state{{session_id=\"{id}\",state=\"idle\"}} 1"
    )));
    assert!(text.contains(&format!(
        "loadwatch_session_state{{session_id=\"{id}\",state=\"loading\"}} 0"
    )));
    assert!(text.contains("label=\"ch \\\"1\\\"\""));
    assert!(text.trim_end().ends_with("# EOF"));
}

#[tokio::test]
async fn create_session_applies_defaults_and_overrides() {
    let app = app();
    let (status, body) = send(&app, json_request("POST", "/api/v1/sessions", Some(json!({})))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["no_response_timeout_ms"], 10_000);
    assert_eq!(body["smart_suggestion_after_ms"], 12_000);
    assert_eq!(body["snapshot"]["state"], "idle");
    assert_eq!(body["snapshot"]["proxy"]["is_responding"], false);

    let (_, body) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/sessions",
            Some(json!({ "label": "news", "no_response_timeout": 4000, "smart_suggestion_after": 9000 })),
        ),
    )
    .await;
    assert_eq!(body["label"], "news");
    assert_eq!(body["no_response_timeout_ms"], 4000);
    assert_eq!(body["smart_suggestion_after_ms"], 9000);

    let (_, list) = send(&app, get("/api/v1/sessions")).await;
    assert_eq!(list.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn create_session_rejects_zero_timeout() {
    let (status, body) = send(
        &app(),
        json_request("POST", "/api/v1/sessions", Some(json!({ "no_response_timeout": 0 }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn session_lookup_errors() {
    let app = app();
    let (status, _) = send(&app, get("/api/v1/sessions/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, get(&format!("/api/v1/sessions/{}", uuid::Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn smart_connecting_then_proxy_response() {
    let app = app();
    let id = create_session(&app, json!({})).await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/sessions/{id}/state"),
            Some(json!({ "state": "connecting", "message": "Connecting...", "smart": true })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["snapshot"]["state"], "proxy_connecting");
    assert_eq!(body["snapshot"]["clock_running"], true);

    let (_, body) = send(
        &app,
        json_request("POST", &format!("/api/v1/sessions/{id}/proxy-response"), None),
    )
    .await;
    assert_eq!(body["snapshot"]["state"], "proxy_responding");
    assert_eq!(body["snapshot"]["proxy"]["is_responding"], true);
}

#[tokio::test]
async fn update_state_rejects_unknown_state() {
    let app = app();
    let id = create_session(&app, json!({})).await;
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/sessions/{id}/state"),
            Some(json!({ "state": "warp_speed" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("warp_speed"));
}

#[tokio::test]
async fn telemetry_counts_and_reset() {
    let app = app();
    let id = create_session(&app, json!({})).await;
    send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/sessions/{id}/state"),
            Some(json!({ "state": "loading", "message": "Loading" })),
        ),
    )
    .await;

    for _ in 0..2 {
        send(&app, json_request("POST", &format!("/api/v1/sessions/{id}/segments"), None)).await;
    }
    let (_, body) = send(&app, json_request("POST", &format!("/api/v1/sessions/{id}/errors"), None)).await;
    assert_eq!(body["snapshot"]["proxy"]["segment_request_count"], 2);
    assert_eq!(body["snapshot"]["proxy"]["error_count"], 1);
    assert_eq!(body["snapshot"]["proxy"]["is_responding"], true);

    let (_, body) = send(&app, json_request("POST", &format!("/api/v1/sessions/{id}/reset"), None)).await;
    assert_eq!(body["snapshot"]["state"], "idle");
    assert_eq!(body["snapshot"]["proxy"]["segment_request_count"], 0);
    assert_eq!(body["snapshot"]["proxy"]["error_count"], 0);
}

#[tokio::test]
async fn verdict_reports_hope_and_failure() {
    let app = app();
    let id = create_session(&app, json!({})).await;
    send(&app, json_request("POST", &format!("/api/v1/sessions/{id}/proxy-response"), None)).await;

    let (status, body) = send(&app, get(&format!("/api/v1/sessions/{id}/verdict"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["failure"]["failed"], false);
    assert!(body["failure_reason"].is_null());
    assert_eq!(body["hope"]["hopeful"], true);
    assert_eq!(body["hope"]["reason"], "proxy_connected");

    for _ in 0..6 {
        send(&app, json_request("POST", &format!("/api/v1/sessions/{id}/errors"), None)).await;
    }
    let (_, body) = send(&app, get(&format!("/api/v1/sessions/{id}/verdict"))).await;
    assert_eq!(body["failure"]["failed"], true);
    assert_eq!(body["failure"]["reason"], "too_many_errors");
    assert!(body["failure_reason"].as_str().unwrap().contains("Too many"));
}

#[tokio::test]
async fn actions_are_offered_only_on_failure() {
    let app = app();
    let id = create_session(&app, json!({})).await;

    let (status, body) = send(
        &app,
        json_request("POST", &format!("/api/v1/sessions/{id}/actions/retry"), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/sessions/{id}/state"),
            Some(json!({ "state": "error", "message": "Playback failed" })),
        ),
    )
    .await;

    let (_, overlay) = send(&app, get(&format!("/api/v1/sessions/{id}/overlay"))).await;
    assert_eq!(overlay["state"], "error");
    assert_eq!(overlay["message"], "Playback failed");
    let kinds: Vec<&str> = overlay["actions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, ["retry", "switch_source"]);

    let (status, body) = send(
        &app,
        json_request("POST", &format!("/api/v1/sessions/{id}/actions/retry"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retry_requests"], 1);
    assert_eq!(body["switch_requests"], 0);

    let (status, _) = send(
        &app,
        json_request("POST", &format!("/api/v1/sessions/{id}/actions/teleport"), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, detail) = send(&app, get(&format!("/api/v1/sessions/{id}"))).await;
    assert_eq!(detail["retry_requests"], 1);
}

#[tokio::test(start_paused = true)]
async fn overlay_suggests_switching_a_silent_source() {
    let app = app();
    let id = create_session(&app, json!({ "smart_suggestion_after": 16500 })).await;
    send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/sessions/{id}/state"),
            Some(json!({ "state": "buffering", "message": "Buffering" })),
        ),
    )
    .await;

    tokio::time::sleep(Duration::from_secs(17)).await;

    let (_, overlay) = send(&app, get(&format!("/api/v1/sessions/{id}/overlay"))).await;
    assert_eq!(overlay["warning"]["severity"], "critical");
    let switch = overlay["actions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["kind"] == "switch_source")
        .unwrap();
    assert_eq!(switch["emphasized"], true);

    let (status, body) = send(
        &app,
        json_request("POST", &format!("/api/v1/sessions/{id}/actions/switch-source"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["switch_requests"], 1);
}

#[tokio::test]
async fn delete_session_removes_it() {
    let app = app();
    let id = create_session(&app, json!({})).await;

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/sessions/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.as_str());

    let (status, _) = send(&app, get(&format!("/api/v1/sessions/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proxy_url_is_built_against_configured_base() {
    let (status, body) = send(
        &app(),
        get("/api/v1/proxy/url?kind=m3u8&url=https%3A%2F%2Fx.com%2Fa.m3u8&source=s1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "m3u8");
    assert_eq!(
        body["url"],
        "http://localhost:3001/api/proxy/m3u8?url=https%3A%2F%2Fx.com%2Fa.m3u8&moontv-source=s1"
    );
}

#[tokio::test]
async fn proxy_url_rejects_unknown_kind() {
    let (status, body) = send(&app(), get("/api/v1/proxy/url?kind=ftp&url=x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("ftp"));
}

#[tokio::test]
async fn proxy_health_probes_the_base_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("tvcors"))
        .mount(&server)
        .await;

    let state = AppState::new().with_proxy(ProxyConfig::new(&server.uri()).unwrap());
    let (status, body) = send(&build_app(state), get("/api/v1/proxy/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
    assert_eq!(body["base_url"], server.uri());
}

#[tokio::test]
async fn proxy_health_reports_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let state = AppState::new().with_proxy(ProxyConfig::new(&server.uri()).unwrap());
    let (_, body) = send(&build_app(state), get("/api/v1/proxy/health")).await;
    assert_eq!(body["healthy"], false);
}
