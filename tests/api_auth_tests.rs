//! 认证 API 集成测试
//! 登录、登出、会话校验与授权查询

mod common;

use axum::http::StatusCode;
use charon::auth::permission::BUILTIN;
use common::{error_code, spawn_app, LOCAL, REMOTE, ROOT_PASSWORD, ROOT_USERNAME};
use serde_json::json;

#[tokio::test]
async fn test_bootstrap_superuser_from_localhost() {
    let app = spawn_app().await;
    let (root_id, token) = app.bootstrap_superuser().await;

    let (status, body) = app
        .call("/charon.Auth/Actor", REMOTE, None, json!({ "access_token": token }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], root_id);
    assert_eq!(body["username"], ROOT_USERNAME);
    assert_eq!(body["is_superuser"], true);
    assert_eq!(body["is_active"], true);
    assert_eq!(body["is_confirmed"], true);

    let permissions: Vec<&str> = body["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap())
        .collect();
    assert_eq!(permissions.len(), BUILTIN.len());
    assert!(permissions.contains(&"charon:user:can create"));
    assert!(permissions.contains(&"charon:refresh_token:can revoke as stranger"));
}

#[tokio::test]
async fn test_second_unauthenticated_superuser_is_rejected() {
    let app = spawn_app().await;
    app.bootstrap_superuser().await;

    let (status, body) = app
        .call(
            "/charon.UserManager/Create",
            REMOTE,
            None,
            json!({ "username": "intruder", "plain_password": "x", "is_superuser": true }),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "ALREADY_EXISTS");
}

#[tokio::test]
async fn test_unauthenticated_regular_user_creation_from_remote() {
    let app = spawn_app().await;

    let (status, body) = app
        .call(
            "/charon.UserManager/Create",
            REMOTE,
            None,
            json!({ "username": "someone", "plain_password": "x" }),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_inactive_user_cannot_login_until_activated() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;

    let (status, body) = app
        .call(
            "/charon.UserManager/Create",
            REMOTE,
            Some(&root),
            json!({
                "username": "john@example.com",
                "plain_password": "secret",
                "is_confirmed": true,
                "is_active": false
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let john = body["user"]["id"].as_i64().unwrap();

    let (status, body) = app
        .call(
            "/charon.Auth/Login",
            REMOTE,
            None,
            json!({ "username": "john@example.com", "password": "secret" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHENTICATED");

    let (status, _) = app
        .call(
            "/charon.UserManager/Modify",
            REMOTE,
            Some(&root),
            json!({ "id": john, "is_active": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let token = app.login("john@example.com", "secret").await;
    assert!(!token.is_empty());
}

#[tokio::test]
async fn test_unconfirmed_user_cannot_login() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;

    let (status, _) = app
        .call(
            "/charon.UserManager/Create",
            REMOTE,
            Some(&root),
            json!({ "username": "pending", "plain_password": "secret", "is_active": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call(
            "/charon.Auth/Login",
            REMOTE,
            None,
            json!({ "username": "pending", "password": "secret" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let app = spawn_app().await;
    app.bootstrap_superuser().await;

    let (status_unknown, unknown) = app
        .call(
            "/charon.Auth/Login",
            REMOTE,
            None,
            json!({ "username": "nobody", "password": ROOT_PASSWORD }),
        )
        .await;
    let (status_wrong, wrong) = app
        .call(
            "/charon.Auth/Login",
            REMOTE,
            None,
            json!({ "username": ROOT_USERNAME, "password": "not-the-password" }),
        )
        .await;

    assert_eq!(status_unknown, StatusCode::UNAUTHORIZED);
    assert_eq!(status_wrong, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown["error"]["message"], wrong["error"]["message"]);
}

#[tokio::test]
async fn test_login_with_empty_credentials() {
    let app = spawn_app().await;

    let (status, body) = app
        .call("/charon.Auth/Login", REMOTE, None, json!({}))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let app = spawn_app().await;
    let (_, token) = app.bootstrap_superuser().await;

    let (status, body) = app
        .call("/charon.Auth/IsAuthenticated", REMOTE, None, json!({ "access_token": token }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authenticated"], true);

    for _ in 0..2 {
        let (status, _) = app
            .call("/charon.Auth/Logout", REMOTE, None, json!({ "access_token": token }))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app
        .call("/charon.Auth/IsAuthenticated", REMOTE, None, json!({ "access_token": token }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authenticated"], false);
}

#[tokio::test]
async fn test_empty_access_token_is_invalid() {
    let app = spawn_app().await;

    for path in ["/charon.Auth/Logout", "/charon.Auth/IsAuthenticated"] {
        let (status, body) = app
            .call(path, REMOTE, None, json!({ "access_token": "" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
        assert_eq!(error_code(&body), "INVALID_ARGUMENT");
    }
}

#[tokio::test]
async fn test_actor_falls_back_to_metadata_token() {
    let app = spawn_app().await;
    let (root_id, token) = app.bootstrap_superuser().await;

    let (status, body) = app
        .call("/charon.Auth/Actor", REMOTE, Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], root_id);

    // 本机调用不会回退为 localhost 主体
    let (status, body) = app.call("/charon.Auth/Actor", LOCAL, None, json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_is_authenticated_false_after_user_deleted() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;
    let (john, john_token) = app.user_with(&root, "john", &[]).await;

    let (status, _) = app
        .call("/charon.UserManager/Delete", REMOTE, Some(&root), json!({ "id": john }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(
            "/charon.Auth/IsAuthenticated",
            REMOTE,
            None,
            json!({ "access_token": john_token }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authenticated"], false);
}

#[tokio::test]
async fn test_is_granted_for_self_and_stranger() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;
    let (john, john_token) = app
        .user_with(&root, "john", &["charon:group:can retrieve"])
        .await;
    let (jane, jane_token) = app.user_with(&root, "jane", &[]).await;

    let (status, body) = app
        .call(
            "/charon.Auth/IsGranted",
            REMOTE,
            Some(&john_token),
            json!({ "user_id": john, "permission": "charon:group:can retrieve" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granted"], true);

    let (status, body) = app
        .call(
            "/charon.Auth/IsGranted",
            REMOTE,
            Some(&john_token),
            json!({ "user_id": jane, "permission": "charon:group:can retrieve" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "PERMISSION_DENIED");

    app.grant(
        jane,
        &["charon:user_permission:can check granting as a stranger"],
    )
    .await;
    let (status, body) = app
        .call(
            "/charon.Auth/IsGranted",
            REMOTE,
            Some(&jane_token),
            json!({ "user_id": john, "permission": "charon:group:can retrieve" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granted"], true);
}

#[tokio::test]
async fn test_is_granted_through_group_and_belongs_to() {
    let app = spawn_app().await;
    let (_, root) = app.bootstrap_superuser().await;
    let (john, john_token) = app.user_with(&root, "john", &[]).await;

    let (status, body) = app
        .call(
            "/charon.GroupManager/Create",
            REMOTE,
            Some(&root),
            json!({ "name": "operators" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let group = body["group"]["id"].as_i64().unwrap();

    let (status, _) = app
        .call(
            "/charon.GroupManager/SetPermissions",
            REMOTE,
            Some(&root),
            json!({ "group_id": group, "permissions": ["charon:group:can modify"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let ask = json!({ "user_id": john, "permission": "charon:group:can modify" });
    let (_, body) = app
        .call("/charon.Auth/IsGranted", REMOTE, Some(&john_token), ask.clone())
        .await;
    assert_eq!(body["granted"], false);

    let (_, body) = app
        .call(
            "/charon.Auth/BelongsTo",
            REMOTE,
            Some(&john_token),
            json!({ "user_id": john, "group_id": group }),
        )
        .await;
    assert_eq!(body["belongs"], false);

    let (status, _) = app
        .call(
            "/charon.UserManager/SetGroups",
            REMOTE,
            Some(&root),
            json!({ "user_id": john, "groups": [group] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call("/charon.Auth/IsGranted", REMOTE, Some(&john_token), ask)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granted"], true);

    let (status, body) = app
        .call(
            "/charon.Auth/BelongsTo",
            REMOTE,
            Some(&john_token),
            json!({ "user_id": john, "group_id": group }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["belongs"], true);
}

#[tokio::test]
async fn test_is_granted_rejects_bad_arguments() {
    let app = spawn_app().await;
    let (root_id, root) = app.bootstrap_superuser().await;

    let (status, _) = app
        .call(
            "/charon.Auth/IsGranted",
            REMOTE,
            Some(&root),
            json!({ "user_id": 0, "permission": "charon:group:can modify" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .call(
            "/charon.Auth/IsGranted",
            REMOTE,
            Some(&root),
            json!({ "user_id": root_id, "permission": "charon::can modify" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_ARGUMENT");
}
