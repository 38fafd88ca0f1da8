//! HTTP 处理器模块
//!
//! One POST endpoint per RPC method. Bodies are JSON; malformed bodies are
//! rejected as INVALID_ARGUMENT in the common error format.

pub mod auth;
pub mod group;
pub mod health;
pub mod permission;
pub mod refresh_token;
pub mod user;

use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// JSON request body of an RPC method.
pub struct RpcRequest<T>(pub T);

impl<S, T> FromRequest<S> for RpcRequest<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::InvalidArgument(rejection.body_text()))?;
        Ok(Self(value))
    }
}
