mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use common::{count_rows, orchestrator, MockDatabase, Reply, ScriptedService};
use nl_sql::config::AppConfig;
use nl_sql::web;
use nl_sql::web::state::AppState;

fn app(db: MockDatabase, replies: Vec<Reply>) -> Router {
    let orchestrator = orchestrator(Arc::new(db), Arc::new(ScriptedService::new(replies)), 3);
    web::app(Arc::new(AppState::new(AppConfig::default(), Arc::new(orchestrator))))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

#[tokio::test]
async fn test_nl_query_then_cache_hit() {
    let app = app(
        MockDatabase::answering(count_rows()),
        vec![Reply::generate("SELECT COUNT(*) FROM products", 0.9)],
    );
    let body = json!({"question": "How many products are there?"});

    let (status, first) = send(&app, Method::POST, "/api/nl-query", Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], json!(true));
    assert_eq!(first["from_cache"], json!(false));
    assert_eq!(first["rows"], json!([{"count": 42}]));
    assert_eq!(first["attempt_count"], json!(1));

    let (_, second) = send(&app, Method::POST, "/api/nl-query", Some(body)).await;
    assert_eq!(second["from_cache"], json!(true));

    let (status, stats) = send(&app, Method::GET, "/api/cache/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["hits"], json!(1));
    assert_eq!(stats["entries"], json!(1));
}

#[tokio::test]
async fn test_empty_question_is_bad_request() {
    let app = app(MockDatabase::answering(count_rows()), Vec::new());
    let (status, _) = send(&app, Method::POST, "/api/nl-query", Some(json!({"question": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreachable_database_is_service_unavailable() {
    let app = app(MockDatabase::unreachable(), Vec::new());
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/nl-query",
        Some(json!({"question": "How many products?"})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.as_str().unwrap().contains("Could not read the database schema"));
}

#[tokio::test]
async fn test_execute_query_reports_rejection() {
    let app = app(MockDatabase::answering(count_rows()), Vec::new());
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/query",
        Some(json!({"query": "DROP TABLE products"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("DROP"));
}

#[tokio::test]
async fn test_cache_management_routes() {
    let app = app(
        MockDatabase::answering(count_rows()),
        vec![Reply::generate("SELECT COUNT(*) FROM products", 0.9)],
    );
    send(
        &app,
        Method::POST,
        "/api/nl-query",
        Some(json!({"question": "How many products are there?"})),
    )
    .await;

    let (status, body) = send(&app, Method::POST, "/api/cache/invalidate/Products", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"table": "Products", "removed": 1}));

    let (status, body) = send(&app, Method::PUT, "/api/cache/enabled", Some(json!({"enabled": false}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], json!(false));

    let (status, _) = send(&app, Method::DELETE, "/api/cache", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_schema_and_status_routes() {
    let app = app(MockDatabase::answering(count_rows()), Vec::new());

    let (status, schema) = send(&app, Method::GET, "/api/schema", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(schema["tables"]["products"]["columns"][0]["name"], json!("id"));
    assert_eq!(schema["fingerprint"].as_str().unwrap().len(), 64);

    let (status, refreshed) = send(&app, Method::POST, "/api/schema/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["fingerprint"], schema["fingerprint"]);

    let (status, body) = send(&app, Method::GET, "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], json!("mock"));
    assert_eq!(body["table_count"], json!(1));
    assert_eq!(body["max_attempts"], json!(3));
    assert_eq!(body["language"], json!("en"));
    assert_eq!(body["llm_backend"], json!("remote"));
    assert_eq!(body["model"], json!("gpt-4o-mini"));
}

#[tokio::test]
async fn test_rate_limited_model_is_too_many_requests() {
    // An empty script answers every completion with a 429
    let app = app(MockDatabase::answering(count_rows()), Vec::new());
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/nl-query",
        Some(json!({"question": "How many products?"})),
    )
    .await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body.as_str().unwrap().contains("rate limited"));
}
