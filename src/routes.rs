//! 路由注册
//! 五个 RPC 门面各自挂载在 /charon.<Facade>/<Method> 下

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::{handlers, middleware::AppState};

/// 请求体大小上限
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let auth_routes = Router::new()
        .route("/charon.Auth/Login", post(handlers::auth::login))
        .route("/charon.Auth/Logout", post(handlers::auth::logout))
        .route("/charon.Auth/IsAuthenticated", post(handlers::auth::is_authenticated))
        .route("/charon.Auth/Actor", post(handlers::auth::actor))
        .route("/charon.Auth/IsGranted", post(handlers::auth::is_granted))
        .route("/charon.Auth/BelongsTo", post(handlers::auth::belongs_to));

    let user_routes = Router::new()
        .route("/charon.UserManager/Create", post(handlers::user::create))
        .route("/charon.UserManager/Modify", post(handlers::user::modify))
        .route("/charon.UserManager/Get", post(handlers::user::get))
        .route("/charon.UserManager/List", post(handlers::user::list))
        .route("/charon.UserManager/Delete", post(handlers::user::delete))
        .route(
            "/charon.UserManager/ListPermissions",
            post(handlers::user::list_permissions),
        )
        .route(
            "/charon.UserManager/SetPermissions",
            post(handlers::user::set_permissions),
        )
        .route("/charon.UserManager/ListGroups", post(handlers::user::list_groups))
        .route("/charon.UserManager/SetGroups", post(handlers::user::set_groups));

    let group_routes = Router::new()
        .route("/charon.GroupManager/Create", post(handlers::group::create))
        .route("/charon.GroupManager/Modify", post(handlers::group::modify))
        .route("/charon.GroupManager/Get", post(handlers::group::get))
        .route("/charon.GroupManager/List", post(handlers::group::list))
        .route("/charon.GroupManager/Delete", post(handlers::group::delete))
        .route(
            "/charon.GroupManager/ListPermissions",
            post(handlers::group::list_permissions),
        )
        .route(
            "/charon.GroupManager/SetPermissions",
            post(handlers::group::set_permissions),
        );

    let permission_routes = Router::new()
        .route("/charon.PermissionManager/Register", post(handlers::permission::register))
        .route("/charon.PermissionManager/List", post(handlers::permission::list))
        .route("/charon.PermissionManager/Get", post(handlers::permission::get));

    let refresh_token_routes = Router::new()
        .route("/charon.RefreshTokenManager/Create", post(handlers::refresh_token::create))
        .route("/charon.RefreshTokenManager/Disable", post(handlers::refresh_token::disable))
        .route("/charon.RefreshTokenManager/Revoke", post(handlers::refresh_token::revoke))
        .route("/charon.RefreshTokenManager/List", post(handlers::refresh_token::list));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(auth_routes)
        .merge(user_routes)
        .merge(group_routes)
        .merge(permission_routes)
        .merge(refresh_token_routes)
        .layer(axum::middleware::from_fn(crate::middleware::request_deadline_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
