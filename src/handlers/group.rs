//! GroupManager facade

use axum::{extract::State, Json};
use std::sync::Arc;

use super::RpcRequest;
use crate::{
    auth::RequestContext,
    error::AppError,
    middleware::AppState,
    models::{
        group::*,
        permission::{ListPermissionsResponse, SetOutcome},
        DeleteResponse,
    },
};

pub async fn create(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<CreateGroupRequest>,
) -> Result<Json<GroupResponse>, AppError> {
    Ok(Json(state.groups.create(&ctx, req).await?))
}

pub async fn modify(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<ModifyGroupRequest>,
) -> Result<Json<GroupResponse>, AppError> {
    Ok(Json(state.groups.modify(&ctx, req).await?))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<GroupIdRequest>,
) -> Result<Json<GroupResponse>, AppError> {
    Ok(Json(state.groups.get(&ctx, req).await?))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<ListGroupsRequest>,
) -> Result<Json<ListGroupsResponse>, AppError> {
    Ok(Json(state.groups.list(&ctx, req).await?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<GroupIdRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    Ok(Json(state.groups.delete(&ctx, req).await?))
}

pub async fn list_permissions(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<GroupIdRequest>,
) -> Result<Json<ListPermissionsResponse>, AppError> {
    Ok(Json(state.groups.list_permissions(&ctx, req).await?))
}

pub async fn set_permissions(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<SetGroupPermissionsRequest>,
) -> Result<Json<SetOutcome>, AppError> {
    Ok(Json(state.groups.set_permissions(&ctx, req).await?))
}
