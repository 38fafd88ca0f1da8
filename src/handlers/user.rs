//! UserManager facade

use axum::{extract::State, Json};
use std::sync::Arc;

use super::RpcRequest;
use crate::{
    auth::RequestContext,
    error::AppError,
    middleware::AppState,
    models::{
        permission::{ListPermissionsResponse, SetOutcome},
        user::*,
        DeleteResponse,
    },
};

pub async fn create(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<CreateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(state.users.create(&ctx, req).await?))
}

pub async fn modify(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<ModifyUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(state.users.modify(&ctx, req).await?))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<UserIdRequest>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(state.users.get(&ctx, req).await?))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<ListUsersRequest>,
) -> Result<Json<ListUsersResponse>, AppError> {
    Ok(Json(state.users.list(&ctx, req).await?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<UserIdRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    Ok(Json(state.users.delete(&ctx, req).await?))
}

pub async fn list_permissions(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<UserIdRequest>,
) -> Result<Json<ListPermissionsResponse>, AppError> {
    Ok(Json(state.users.list_permissions(&ctx, req).await?))
}

pub async fn set_permissions(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<SetUserPermissionsRequest>,
) -> Result<Json<SetOutcome>, AppError> {
    Ok(Json(state.users.set_permissions(&ctx, req).await?))
}

pub async fn list_groups(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<UserIdRequest>,
) -> Result<Json<ListUserGroupsResponse>, AppError> {
    Ok(Json(state.users.list_groups(&ctx, req).await?))
}

pub async fn set_groups(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<SetUserGroupsRequest>,
) -> Result<Json<SetOutcome>, AppError> {
    Ok(Json(state.users.set_groups(&ctx, req).await?))
}
