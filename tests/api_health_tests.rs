//! 健康检查 API 集成测试

use axum::{
    body::Body,
    http::{Request, StatusCode},
};

mod common;
use common::spawn_app;

#[tokio::test]
async fn test_health_endpoint_without_database() {
    let app = spawn_app().await;

    let (status, json) = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["database"], "skipped");
    assert!(json["version"].is_string());
    assert!(json["uptime_secs"].is_number());
    assert!(json.get("message").is_none());
}

#[tokio::test]
async fn test_not_found_endpoint() {
    let app = spawn_app().await;

    let (status, _) = app
        .send(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rpc_methods_only_accept_post() {
    let app = spawn_app().await;

    let (status, _) = app
        .send(
            Request::builder()
                .uri("/charon.Auth/Login")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}
