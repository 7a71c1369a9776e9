//! Router tests over an in-memory engine.
//!
//! The manual scheduler keeps background cycles queued, so intake responses
//! and queries can be asserted without any network activity.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use relay_api::{create_router, AppState};
use relay_core::InMemoryStore;
use relay_pipeline::{
    notify::{AirflowAuth, AirflowRoute},
    AirflowNotifier, HttpFileFetcher, ManualScheduler, MemoryBlobStore, NotifierConfig,
    ProcessingEngine, RetryPolicy,
};

struct TestApp {
    router: Router,
    _scratch: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let scratch = tempfile::tempdir().expect("tempdir");

    // The notifier is never reached: cycles stay queued in the manual
    // scheduler for the duration of these tests.
    let notifier = AirflowNotifier::new(NotifierConfig::new(
        AirflowRoute {
            base_url: "http://127.0.0.1:1/api/v1".to_string(),
            dag_id: "webhook-sintegre".to_string(),
            auth: AirflowAuth::Basic { username: "x".to_string(), password: "y".to_string() },
        },
        None,
    ));

    let engine = ProcessingEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(HttpFileFetcher::new(scratch.path()).expect("fetcher")),
        Arc::new(MemoryBlobStore::new()),
        Arc::new(notifier),
        Arc::new(ManualScheduler::new()),
        RetryPolicy::default(),
    );

    let router = create_router(AppState::new(engine), Duration::from_secs(30));
    TestApp { router, _scratch: scratch }
}

fn webhook_payload() -> serde_json::Value {
    serde_json::json!({
        "nome": "IPDO",
        "processo": "Programação Diária",
        "dataProduto": "2024-05-02",
        "macroProcesso": "Operação",
        "periodicidade": "2024-05-02T00:00:00Z",
        "periodicidadeFinal": "2024-05-03T00:00:00Z",
        "url": "https://sintegre.example/file.pdf"
    })
}

async fn post_json(router: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

async fn get(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn health_endpoint_responds() {
    let app = test_app();
    let (status, body) = get(&app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn intake_returns_created_pending_record() {
    let app = test_app();
    let (status, body) = post_json(&app.router, "/api/webhooks/sintegre", webhook_payload()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["nome"], "IPDO");
    assert_eq!(body["downloadStatus"], "PENDING");
    assert_eq!(body["retryCount"], 0);
    assert!(body["id"].is_string());
    assert!(body.get("s3Key").is_none());
}

#[tokio::test]
async fn list_and_lookup_round_trip() {
    let app = test_app();
    let (_, created) = post_json(&app.router, "/api/webhooks/sintegre", webhook_payload()).await;
    let id = created["id"].as_str().unwrap();

    let (status, listed) = get(&app.router, "/api/webhooks").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, found) = get(&app.router, &format!("/api/webhooks/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["id"], created["id"]);

    let (status, filtered) = get(&app.router, "/api/webhooks?status=PROCESSED").await;
    assert_eq!(status, StatusCode::OK);
    assert!(filtered.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_record_is_404() {
    let app = test_app();
    let missing = uuid::Uuid::new_v4();

    let (status, body) = get(&app.router, &format!("/api/webhooks/{missing}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn garbage_date_filter_is_400() {
    let app = test_app();
    let (status, body) = get(&app.router, "/api/webhooks?startDate=yesterday").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn download_before_processing_is_rejected() {
    let app = test_app();
    let (_, created) = post_json(&app.router, "/api/webhooks/sintegre", webhook_payload()).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = get(&app.router, &format!("/api/webhooks/{id}/download")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn reprocess_without_stored_file_is_rejected() {
    let app = test_app();
    let (_, created) = post_json(&app.router, "/api/webhooks/sintegre", webhook_payload()).await;
    let id = created["id"].as_str().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/webhooks/{id}/reprocess"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_state");
}

#[tokio::test]
async fn metrics_and_timeline_reflect_created_records() {
    let app = test_app();
    post_json(&app.router, "/api/webhooks/sintegre", webhook_payload()).await;
    post_json(&app.router, "/api/webhooks/sintegre", webhook_payload()).await;

    let (status, metrics) = get(&app.router, "/api/webhooks/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["total"]["total"], 2);
    assert_eq!(metrics["total"]["pending"], 2);

    let (status, timeline) = get(&app.router, "/api/webhooks/timeline").await;
    assert_eq!(status, StatusCode::OK);
    let groups = timeline["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["nome"], "IPDO");
    assert_eq!(groups[0]["events"].as_array().unwrap().len(), 2);

    let (status, filtered) =
        get(&app.router, "/api/webhooks/timeline/filtered?nome=Outro").await;
    assert_eq!(status, StatusCode::OK);
    assert!(filtered["groups"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = test_app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert!(response.headers().contains_key("X-Request-Id"));
}
