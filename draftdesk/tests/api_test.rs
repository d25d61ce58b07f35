//! Session API Integration Tests
//!
//! Full HTTP request/response cycles against the router with a stub backend

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tower::ServiceExt;

use draftdesk::api;
use draftdesk::app_state::AppState;
use draftdesk::config::{ConfigError, GenerationSettings, API_KEY_ENV};
use draftdesk::generation::{
    GenerationBackend, GenerationClient, GenerationError, GenerationRequest,
};
use draftdesk::session::PLACEHOLDER_DOCUMENT;

const DRAFT_REPLY: &str =
    "# Draft\n\nGenerated body text that is long enough to be worth scanning for improvements.";

/// Answers by callsite. With a gate, every call waits for a permit first.
struct StubBackend {
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl GenerationBackend for StubBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| GenerationError::Transport(e.to_string()))?
                .forget();
        }
        Ok(match request.callsite {
            "draft" => DRAFT_REPLY.to_string(),
            "refine" => "Plan".to_string(),
            "scan" => json!([{
                "id": "s1",
                "originalText": "Generated body text",
                "suggestedText": "Freshly generated body text",
                "reason": "more vivid"
            }])
            .to_string(),
            _ => String::new(),
        })
    }
}

fn stub_backend(gate: Option<Arc<Semaphore>>) -> Arc<StubBackend> {
    Arc::new(StubBackend {
        calls: AtomicUsize::new(0),
        gate,
    })
}

const TEST_ATTACHMENT_LIMIT: usize = 1024;

fn setup_test_app(backend: Arc<StubBackend>) -> axum::Router {
    setup_test_app_with_limit(backend, TEST_ATTACHMENT_LIMIT)
}

fn setup_test_app_with_limit(
    backend: Arc<StubBackend>,
    max_attachment_bytes: usize,
) -> axum::Router {
    let client = GenerationClient::new(backend, GenerationSettings::default());
    api::router(max_attachment_bytes)
        .with_state(AppState::new(Ok(client), max_attachment_bytes))
}

fn setup_unconfigured_app() -> axum::Router {
    let state = AppState::new(
        Err(ConfigError::MissingApiKey(API_KEY_ENV.to_string())),
        TEST_ATTACHMENT_LIMIT,
    );
    api::router(TEST_ATTACHMENT_LIMIT).with_state(state)
}

async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("Request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value: Value = serde_json::from_slice(&body).expect("Invalid JSON response");
    (status, value)
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn drafted_app() -> (axum::Router, Arc<StubBackend>) {
    let backend = stub_backend(None);
    let app = setup_test_app(backend.clone());
    let (status, body) = json_response(
        &app,
        request("POST", "/session/draft", Some(json!({"instructions": "Write a draft"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "applied");
    (app, backend)
}

// ============================================================================
// Basics
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = setup_unconfigured_app();
    let (status, body) = json_response(&app, request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "draftdesk");
}

#[tokio::test]
async fn test_initial_snapshot() {
    let app = setup_unconfigured_app();
    let (status, body) = json_response(&app, request("GET", "/session", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "welcome");
    assert_eq!(body["document"], "");
    assert!(body["in_flight"].is_null());
    assert!(body["selection"].is_null());
}

// ============================================================================
// Draft
// ============================================================================

#[tokio::test]
async fn test_empty_draft_needs_no_backend() {
    let app = setup_unconfigured_app();
    let (status, body) =
        json_response(&app, request("POST", "/session/draft", Some(json!({})))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "placeholder");
    assert_eq!(body["snapshot"]["mode"], "editing");
    assert_eq!(body["snapshot"]["document"], PLACEHOLDER_DOCUMENT);
}

#[tokio::test]
async fn test_draft_without_key_is_not_configured() {
    let app = setup_unconfigured_app();
    let (status, body) = json_response(
        &app,
        request("POST", "/session/draft", Some(json!({"instructions": "Write"}))),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "NOT_CONFIGURED");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains(API_KEY_ENV));

    // The issued request was released
    let (_, snapshot) = json_response(&app, request("GET", "/session", None)).await;
    assert!(snapshot["in_flight"].is_null());
    assert_eq!(snapshot["mode"], "welcome");
}

#[tokio::test]
async fn test_draft_replaces_document() {
    let (app, backend) = drafted_app().await;
    let (_, snapshot) = json_response(&app, request("GET", "/session", None)).await;
    assert_eq!(snapshot["document"], DRAFT_REPLY);
    assert_eq!(snapshot["mode"], "editing");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_draft_with_attachment() {
    let backend = stub_backend(None);
    let app = setup_test_app(backend.clone());
    let (status, body) = json_response(
        &app,
        request(
            "POST",
            "/session/draft",
            Some(json!({
                "attachments": [{"name": "memo.mp3", "data": "data:audio/mpeg;base64,SUQzBAAAAAAA"}]
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "applied");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_attachment_rejected() {
    let backend = stub_backend(None);
    let app = setup_test_app(backend.clone());
    let (status, body) = json_response(
        &app,
        request(
            "POST",
            "/session/draft",
            Some(json!({
                "instructions": "Summarize",
                "attachments": [{"name": "notes.txt", "data": "not base64 at all!"}]
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_ATTACHMENT");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_retry_without_failure() {
    let app = setup_test_app(stub_backend(None));
    let (status, body) = json_response(&app, request("POST", "/session/draft/retry", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

// ============================================================================
// Selection and refine
// ============================================================================

#[tokio::test]
async fn test_refine_without_selection() {
    let (app, _backend) = drafted_app().await;
    let (status, body) = json_response(
        &app,
        request("POST", "/session/refine", Some(json!({"instruction": "shorter"}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "NO_SELECTION");
}

#[tokio::test]
async fn test_select_and_refine() {
    let (app, backend) = drafted_app().await;

    let (status, snapshot) = json_response(
        &app,
        request(
            "POST",
            "/session/selection",
            Some(json!({
                "start": 2,
                "end": 7,
                "rect": {"left": 100.0, "top": 50.0, "width": 40.0, "height": 18.0}
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["selection"]["span"]["text"], "Draft");
    assert_eq!(snapshot["selection"]["anchor"]["x"], 120.0);
    assert_eq!(snapshot["selection"]["anchor"]["y"], 40.0);

    let (status, body) = json_response(
        &app,
        request("POST", "/session/refine", Some(json!({"instruction": "call it a plan"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "applied");
    assert!(body["snapshot"]["document"]
        .as_str()
        .unwrap()
        .starts_with("# Plan\n\n"));
    assert!(body["snapshot"]["selection"].is_null());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clear_selection() {
    let (app, _backend) = drafted_app().await;
    json_response(
        &app,
        request("POST", "/session/selection", Some(json!({"start": 2, "end": 7}))),
    )
    .await;
    let (status, snapshot) = json_response(&app, request("DELETE", "/session/selection", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(snapshot["selection"].is_null());
}

#[tokio::test]
async fn test_selection_drag_publishes_on_completion() {
    let (app, _backend) = drafted_app().await;

    let (status, snapshot) = json_response(
        &app,
        request("PATCH", "/session/selection", Some(json!({"start": 2, "end": 4}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["selecting"], true);
    assert!(snapshot["selection"].is_null());

    let (_, snapshot) = json_response(
        &app,
        request("POST", "/session/selection", Some(json!({"start": 2, "end": 7}))),
    )
    .await;
    assert_eq!(snapshot["selecting"], false);
    assert_eq!(snapshot["selection"]["span"]["text"], "Draft");
}

// ============================================================================
// Scan and suggestions
// ============================================================================

#[tokio::test]
async fn test_scan_and_apply_suggestion() {
    let (app, _backend) = drafted_app().await;

    let (status, body) = json_response(&app, request("POST", "/session/scan", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "applied");
    let suggestions = body["snapshot"]["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["id"], "s1");

    let (status, body) = json_response(
        &app,
        request("GET", "/session/render?highlight=Generated%20body%20text", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["html"]
        .as_str()
        .unwrap()
        .contains("<mark class=\"suggestion-highlight\">Generated body text</mark>"));

    let (status, body) =
        json_response(&app, request("POST", "/session/suggestions/s1/apply", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "applied");
    assert!(body["snapshot"]["document"]
        .as_str()
        .unwrap()
        .contains("Freshly generated body text"));
    assert!(body["snapshot"]["suggestions"]
        .as_array()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_unknown_suggestion_is_not_found() {
    let (app, _backend) = drafted_app().await;
    let (status, body) =
        json_response(&app, request("POST", "/session/suggestions/nope/apply", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) =
        json_response(&app, request("DELETE", "/session/suggestions/nope", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_large_media_attachment_fits_body_limit() {
    let backend = stub_backend(None);
    let app = setup_test_app_with_limit(backend.clone(), 20 * 1024 * 1024);
    let audio = vec![0x49u8; 3 * 1024 * 1024];
    let data = format!("data:audio/mpeg;base64,{}", STANDARD.encode(&audio));

    let (status, body) = json_response(
        &app,
        request(
            "POST",
            "/session/draft",
            Some(json!({"attachments": [{"name": "interview.mp3", "data": data}]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "applied");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_oversized_attachment_is_rejected() {
    let app = setup_test_app(stub_backend(None));
    let data = STANDARD.encode(vec![0u8; TEST_ATTACHMENT_LIMIT + 1]);
    let (status, body) = json_response(
        &app,
        request(
            "POST",
            "/session/draft",
            Some(json!({"attachments": [{"name": "memo.mp3", "data": data}]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_ATTACHMENT");
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_second_request_while_busy() {
    let gate = Arc::new(Semaphore::new(0));
    let backend = stub_backend(Some(gate.clone()));
    let app = setup_test_app(backend.clone());

    let pending = {
        let app = app.clone();
        tokio::spawn(async move {
            json_response(
                &app,
                request("POST", "/session/draft", Some(json!({"instructions": "Write"}))),
            )
            .await
        })
    };

    let mut in_flight = Value::Null;
    for _ in 0..200 {
        let (_, snapshot) = json_response(&app, request("GET", "/session", None)).await;
        in_flight = snapshot["in_flight"].clone();
        if !in_flight.is_null() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(in_flight, "draft");

    let (status, body) = json_response(&app, request("POST", "/session/scan", None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "BUSY");

    gate.add_permits(1);
    let (status, body) = pending.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "applied");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_draft_is_discarded() {
    let gate = Arc::new(Semaphore::new(0));
    let backend = stub_backend(Some(gate.clone()));
    let app = setup_test_app(backend.clone());

    let pending = {
        let app = app.clone();
        tokio::spawn(async move {
            json_response(
                &app,
                request("POST", "/session/draft", Some(json!({"instructions": "Write"}))),
            )
            .await
        })
    };
    while backend.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, snapshot) = json_response(&app, request("POST", "/session/cancel", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(snapshot["in_flight"].is_null());

    gate.add_permits(1);
    let (status, body) = pending.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "discarded");
    assert_eq!(body["snapshot"]["document"], "");
    assert_eq!(body["snapshot"]["mode"], "welcome");
}

#[tokio::test]
async fn test_dropped_request_releases_session() {
    let gate = Arc::new(Semaphore::new(0));
    let backend = stub_backend(Some(gate.clone()));
    let app = setup_test_app(backend.clone());

    let pending = {
        let app = app.clone();
        tokio::spawn(async move {
            json_response(
                &app,
                request("POST", "/session/draft", Some(json!({"instructions": "Write"}))),
            )
            .await
        })
    };
    while backend.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Client disconnects while the backend call is suspended
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    let (_, snapshot) = json_response(&app, request("GET", "/session", None)).await;
    assert!(snapshot["in_flight"].is_null());
    assert_eq!(snapshot["document"], "");

    gate.add_permits(1);
    let (status, body) = json_response(
        &app,
        request("POST", "/session/draft", Some(json!({"instructions": "Write again"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "applied");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Projections
// ============================================================================

#[tokio::test]
async fn test_structured_edit_cycle() {
    let app = setup_unconfigured_app();
    json_response(
        &app,
        request("PUT", "/session/document", Some(json!({"content": "# Title\n\nBody.\n"}))),
    )
    .await;

    let (status, tree) =
        json_response(&app, request("POST", "/session/structured/edit", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tree["blocks"][0]["type"], "heading");

    let (_, view) = json_response(&app, request("GET", "/session/structured", None)).await;
    assert_eq!(view["view_is_source"], true);
    assert!(view["tree"].is_null());

    let mut edited = tree.clone();
    edited["blocks"][1]["content"][0]["text"] = json!("Edited body.");
    let (status, snapshot) =
        json_response(&app, request("PUT", "/session/structured", Some(edited))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["document"], "# Title\n\nEdited body.\n");
    assert_eq!(snapshot["view_is_source"], false);
}

#[tokio::test]
async fn test_export_formats() {
    let app = setup_unconfigured_app();
    json_response(
        &app,
        request("PUT", "/session/document", Some(json!({"content": "Hello **world**"}))),
    )
    .await;

    let (status, body) = json_response(&app, request("GET", "/session/export", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["format"], "markdown");
    assert_eq!(body["content"], "Hello **world**");

    let (_, body) = json_response(&app, request("GET", "/session/export?format=html", None)).await;
    assert_eq!(body["format"], "html");
    assert_eq!(body["content"], "<p>Hello <strong>world</strong></p>\n");
}

#[tokio::test]
async fn test_notices_are_drained() {
    let gate = Arc::new(Semaphore::new(0));
    let app = setup_test_app(stub_backend(Some(gate)));
    json_response(
        &app,
        request("PUT", "/session/document", Some(json!({"content": "text"}))),
    )
    .await;

    let (_, body) = json_response(&app, request("GET", "/session/notices", None)).await;
    assert!(body.as_array().unwrap().is_empty());

    // Cancelling with nothing in flight produces no notice
    json_response(&app, request("POST", "/session/cancel", None)).await;
    let (_, body) = json_response(&app, request("GET", "/session/notices", None)).await;
    assert!(body.as_array().unwrap().is_empty());
}
