//! PermissionManager facade

use axum::{extract::State, Json};
use std::sync::Arc;

use super::RpcRequest;
use crate::{
    auth::RequestContext, error::AppError, middleware::AppState, models::permission::*,
};

pub async fn register(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<RegisterPermissionsRequest>,
) -> Result<Json<RegisterOutcome>, AppError> {
    Ok(Json(state.permissions.register(&ctx, req).await?))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<ListPermissionsRequest>,
) -> Result<Json<ListPermissionsResponse>, AppError> {
    Ok(Json(state.permissions.list(&ctx, req).await?))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<PermissionIdRequest>,
) -> Result<Json<PermissionResponse>, AppError> {
    Ok(Json(state.permissions.get(&ctx, req).await?))
}
