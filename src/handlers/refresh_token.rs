//! RefreshTokenManager facade

use axum::{extract::State, Json};
use std::sync::Arc;

use super::RpcRequest;
use crate::{
    auth::RequestContext, error::AppError, middleware::AppState, models::refresh_token::*,
};

pub async fn create(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<CreateRefreshTokenRequest>,
) -> Result<Json<RefreshTokenResponse>, AppError> {
    Ok(Json(state.refresh_tokens.create(&ctx, req).await?))
}

pub async fn disable(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<RefreshTokenKeyRequest>,
) -> Result<Json<RefreshTokenResponse>, AppError> {
    Ok(Json(state.refresh_tokens.disable(&ctx, req).await?))
}

pub async fn revoke(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<RefreshTokenKeyRequest>,
) -> Result<Json<RefreshTokenResponse>, AppError> {
    Ok(Json(state.refresh_tokens.revoke(&ctx, req).await?))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    RpcRequest(req): RpcRequest<ListRefreshTokensRequest>,
) -> Result<Json<ListRefreshTokensResponse>, AppError> {
    Ok(Json(state.refresh_tokens.list(&ctx, req).await?))
}
