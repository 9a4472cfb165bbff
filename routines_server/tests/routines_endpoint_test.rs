//! Router-level tests for `/routines`, `/tasks`, `/health` and the index page.
//!
//! Requests go through `tower::ServiceExt::oneshot`, so no socket is opened.

mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::sample_registry;
use routines_server::{RoutinesServer, ServerConfig};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use url::form_urlencoded;

fn app() -> Router {
    RoutinesServer::new(ServerConfig::default(), Arc::new(sample_registry())).router()
}

async fn get(uri: &str) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

fn query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

#[tokio::test]
async fn test_run_streams_plain_text_between_banners() {
    let (status, headers, body) = get("/routines?action=samples_hello").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");

    assert!(
        body.starts_with(
            "Memory limit set: 512M. Max execution time set: 720 seconds.\n\nhello\n\nPeak memory usage: "
        ),
        "{body:?}"
    );
    assert!(body.ends_with(" seconds.\n\n"));
}

#[tokio::test]
async fn test_missing_and_unknown_actions() {
    let (status, _, _) = get("/routines").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = get("/routines?action=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = get("/routines?action=samples_missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("samples_missing"));
}

#[tokio::test]
async fn test_arguments_arrive_positionally() {
    let args = json!(["two words", 3, {"nested": [true]}]).to_string();
    let (status, _, body) = get(&format!(
        "/routines?{}",
        query(&[("action", "quiet_plain"), ("args", &args)])
    ))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "3 args\n");
}

#[tokio::test]
async fn test_non_json_args_are_passed_as_text() {
    let (_, _, body) = get(&format!(
        "/routines?{}",
        query(&[("action", "samples_echo"), ("args", "plain text")])
    ))
    .await;
    assert!(body.contains("\n\nplain text\n\nPeak memory usage"), "{body:?}");
}

#[tokio::test]
async fn test_post_form_wins_over_query() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/routines?action=samples_hello")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(query(&[
                    ("action", "quiet_plain"),
                    ("args", "[1,2]"),
                ])))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"2 args\n");
}

#[tokio::test]
async fn test_post_without_form_body_uses_query() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/routines?action=quiet_plain")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"0 args\n");
}

#[tokio::test]
async fn test_failing_task_ends_without_closing_banner() {
    let (status, _, body) = get("/routines?action=samples_broken").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.ends_with("\n\nbefore failure\n"), "{body:?}");
    assert!(!body.contains("Peak memory usage"));
}

#[tokio::test]
async fn test_action_override_applies_to_one_task() {
    let mut config = ServerConfig::default();
    config.actions.insert(
        "samples_hello".into(),
        routines_server::RoutineSettings::default().without_start_banner(),
    );
    let app = RoutinesServer::new(config, Arc::new(sample_registry())).router();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/routines?action=samples_hello")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.starts_with(b"hello\n\nPeak memory usage: "));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/routines?action=samples_echo")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.starts_with(b"Memory limit set: "));
}

#[tokio::test]
async fn test_tasks_lists_groups_in_order() {
    let (status, headers, body) = get("/tasks").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");

    let listing: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        listing,
        json!([
            {
                "name": "Samples",
                "tasks": [
                    {"title": "Hello", "action": "samples_hello", "priority": 10},
                    {"title": "Echo", "action": "samples_echo", "priority": 10},
                    {"title": "Broken", "action": "samples_broken", "priority": 10}
                ]
            },
            {
                "name": "Quiet",
                "tasks": [
                    {"title": "Plain", "action": "quiet_plain", "priority": 10}
                ]
            }
        ])
    );
}

#[tokio::test]
async fn test_health_reports_no_runs_when_idle() {
    let (status, _, body) = get("/health").await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health, json!({"status": "ok", "in_flight": 0}));
}

#[tokio::test]
async fn test_index_links_every_task() {
    let (status, headers, body) = get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    for action in ["samples_hello", "samples_echo", "samples_broken", "quiet_plain"] {
        assert!(
            body.contains(&format!("href=\"/routines?action={action}\"")),
            "missing link for {action}"
        );
    }
    assert!(body.contains("<h2>Quiet</h2>"));
    assert!(!body.contains(" ( "));
}

#[tokio::test]
async fn test_index_carries_args_keyed_by_action() {
    let (status, _, body) = get("/?samples_echo=%5B3%5D").await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        body.contains("href=\"/routines?action=samples_echo&amp;args=%5B3%5D\">Echo</a> ( [3] )"),
        "args for samples_echo not carried: {body}"
    );
    assert!(body.contains("href=\"/routines?action=samples_hello\">Hello</a></li>"));
}

#[tokio::test]
async fn test_index_ignores_a_bare_args_key() {
    let (_, _, body) = get("/?args=%5B1%5D").await;
    assert!(!body.contains("args=%5B1%5D"));
}
