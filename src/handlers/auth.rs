//! Auth facade

use axum::{extract::State, Json};
use std::sync::Arc;

use super::RpcRequest;
use crate::{
    auth::RequestContext,
    error::AppError,
    middleware::AppState,
    models::{auth::*, Empty},
};

pub async fn login(
    State(state): State<Arc<AppState>>,
    RpcRequest(req): RpcRequest<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    Ok(Json(state.auth.login(req).await?))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    RpcRequest(req): RpcRequest<AccessTokenRequest>,
) -> Result<Json<Empty>, AppError> {
    Ok(Json(state.auth.logout(req).await?))
}

pub async fn is_authenticated(
    State(state): State<Arc<AppState>>,
    RpcRequest(req): RpcRequest<AccessTokenRequest>,
) -> Result<Json<IsAuthenticatedResponse>, AppError> {
    Ok(Json(state.auth.is_authenticated(req).await?))
}

pub async fn actor(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<AccessTokenRequest>,
) -> Result<Json<ActorResponse>, AppError> {
    Ok(Json(state.auth.actor(&ctx, req).await?))
}

pub async fn is_granted(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<IsGrantedRequest>,
) -> Result<Json<IsGrantedResponse>, AppError> {
    Ok(Json(state.auth.is_granted(&ctx, req).await?))
}

pub async fn belongs_to(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<BelongsToRequest>,
) -> Result<Json<BelongsToResponse>, AppError> {
    Ok(Json(state.auth.belongs_to(&ctx, req).await?))
}
