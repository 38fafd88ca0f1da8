//! 刷新令牌 API 集成测试

mod common;

use axum::http::StatusCode;
use charon::models::{patch::Patch, refresh_token::RefreshTokenPatch};
use chrono::{Duration, Utc};
use common::{error_code, spawn_app, TestApp, LOCAL, REMOTE};
use serde_json::{json, Value};

const HOLDER_PERMISSIONS: &[&str] = &[
    "charon:refresh_token:can create",
    "charon:refresh_token:can disable as owner",
    "charon:refresh_token:can retrieve as owner",
];

async fn create_token(app: &TestApp, access_token: &str) -> String {
    let (status, body) = app
        .call(
            "/charon.RefreshTokenManager/Create",
            REMOTE,
            Some(access_token),
            json!({ "notes": "ci pipeline" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "refresh token creation failed: {body}");
    body["refresh_token"]["token"].as_str().unwrap().to_string()
}

async fn login_with(app: &TestApp, refresh_token: &str) -> (StatusCode, Value) {
    app.call(
        "/charon.Auth/Login",
        REMOTE,
        None,
        json!({ "strategy": { "refresh_token": { "refresh_token": refresh_token } } }),
    )
    .await
}

async fn is_authenticated(app: &TestApp, access_token: &str) -> bool {
    let (status, body) = app
        .call(
            "/charon.Auth/IsAuthenticated",
            REMOTE,
            None,
            json!({ "access_token": access_token }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    body["authenticated"].as_bool().unwrap()
}

#[tokio::test]
async fn test_disable_invalidates_bound_sessions() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;
    let (john, john_token) = app.user_with(&root, "john", HOLDER_PERMISSIONS).await;

    let refresh = create_token(&app, &john_token).await;
    assert_eq!(refresh.len(), 64);

    let (status, body) = login_with(&app, &refresh).await;
    assert_eq!(status, StatusCode::OK);
    let session = body["access_token"].as_str().unwrap().to_string();
    assert!(is_authenticated(&app, &session).await);

    let (_, body) = app
        .call("/charon.RefreshTokenManager/List", REMOTE, Some(&john_token), json!({}))
        .await;
    let listed = &body["refresh_tokens"][0];
    assert_eq!(listed["token"], refresh.as_str());
    assert!(!listed["last_used_at"].is_null());

    let (status, body) = app
        .call(
            "/charon.RefreshTokenManager/Disable",
            REMOTE,
            Some(&john_token),
            json!({ "token": refresh, "user_id": john }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refresh_token"]["revoked"], true);
    assert!(body["refresh_token"]["expire_at"].is_null());

    assert!(!is_authenticated(&app, &session).await);
    // 用户名密码会话不受影响
    assert!(is_authenticated(&app, &john_token).await);

    let (status, body) = login_with(&app, &refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_session_fails_closed_once_token_row_is_revoked() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;
    let (john, john_token) = app.user_with(&root, "john", HOLDER_PERMISSIONS).await;
    let refresh = create_token(&app, &john_token).await;

    let (_, body) = login_with(&app, &refresh).await;
    let session = body["access_token"].as_str().unwrap().to_string();
    assert!(is_authenticated(&app, &session).await);

    // 仅更新令牌行，不删除会话
    app.ctx
        .repositories
        .refresh_token
        .update_one_by_token_and_user_id(
            &refresh,
            john,
            &RefreshTokenPatch {
                revoked: Patch::Value(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let (status, body) = app
        .call("/charon.Auth/Actor", REMOTE, Some(&session), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHENTICATED");
    assert!(!is_authenticated(&app, &session).await);
    assert!(is_authenticated(&app, &john_token).await);
}

#[tokio::test]
async fn test_session_fails_closed_once_token_expires() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;
    let (john, john_token) = app.user_with(&root, "john", HOLDER_PERMISSIONS).await;
    let refresh = create_token(&app, &john_token).await;

    let (_, body) = login_with(&app, &refresh).await;
    let session = body["access_token"].as_str().unwrap().to_string();

    app.ctx
        .repositories
        .refresh_token
        .update_one_by_token_and_user_id(
            &refresh,
            john,
            &RefreshTokenPatch {
                expire_at: Patch::Value(Utc::now() - Duration::minutes(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!is_authenticated(&app, &session).await);
}

#[tokio::test]
async fn test_revoke_expires_token() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;
    let (john, john_token) = app.user_with(&root, "john", HOLDER_PERMISSIONS).await;
    let refresh = create_token(&app, &john_token).await;

    let key = json!({ "token": refresh, "user_id": john });

    let (status, _) = app
        .call("/charon.RefreshTokenManager/Revoke", REMOTE, Some(&john_token), key.clone())
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call("/charon.RefreshTokenManager/Revoke", REMOTE, Some(&root), key)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refresh_token"]["revoked"], true);
    assert!(!body["refresh_token"]["expire_at"].is_null());
}

#[tokio::test]
async fn test_stranger_cannot_disable_foreign_token() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;
    let (john, john_token) = app.user_with(&root, "john", HOLDER_PERMISSIONS).await;
    let (_, jane_token) = app.user_with(&root, "jane", HOLDER_PERMISSIONS).await;
    let refresh = create_token(&app, &john_token).await;

    let (status, body) = app
        .call(
            "/charon.RefreshTokenManager/Disable",
            REMOTE,
            Some(&jane_token),
            json!({ "token": refresh, "user_id": john }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "PERMISSION_DENIED");
}

#[tokio::test]
async fn test_disable_unknown_token() {
    let app = spawn_app().await;
    let (root_id, root) = app.bootstrap_superuser().await;

    let (status, _) = app
        .call(
            "/charon.RefreshTokenManager/Disable",
            REMOTE,
            Some(&root),
            json!({ "token": "deadbeef", "user_id": root_id }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(
            "/charon.RefreshTokenManager/Disable",
            REMOTE,
            Some(&root),
            json!({ "token": "", "user_id": root_id }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_is_narrowed_to_own_tokens() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;
    let (john, john_token) = app.user_with(&root, "john", HOLDER_PERMISSIONS).await;
    let (jane, jane_token) = app.user_with(&root, "jane", HOLDER_PERMISSIONS).await;

    create_token(&app, &john_token).await;
    create_token(&app, &jane_token).await;

    let (status, body) = app
        .call(
            "/charon.RefreshTokenManager/List",
            REMOTE,
            Some(&jane_token),
            json!({ "user_id": john }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let tokens = body["refresh_tokens"].as_array().unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0]["user_id"], jane);

    let (_, body) = app
        .call("/charon.RefreshTokenManager/List", REMOTE, Some(&root), json!({}))
        .await;
    assert_eq!(body["refresh_tokens"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_create_rejects_past_expiry() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;

    let (status, body) = app
        .call(
            "/charon.RefreshTokenManager/Create",
            REMOTE,
            Some(&root),
            json!({ "expire_at": "2000-01-01T00:00:00Z" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_ARGUMENT");

    let (status, body) = app
        .call(
            "/charon.RefreshTokenManager/Create",
            REMOTE,
            Some(&root),
            json!({ "expire_at": "2999-01-01T00:00:00Z" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["refresh_token"]["expire_at"].is_null());
}

#[tokio::test]
async fn test_create_needs_a_user() {
    let app = spawn_app().await;
    app.bootstrap_superuser().await;

    let (status, body) = app
        .call("/charon.RefreshTokenManager/Create", LOCAL, None, json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHENTICATED");

    let (status, _) = login_with(&app, "").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = login_with(&app, "does-not-exist").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
