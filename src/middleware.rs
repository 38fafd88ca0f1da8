//! HTTP 中间件
//! 应用状态、请求追踪、请求截止时间

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    auth::actor::REQUEST_ID_KEY,
    config::AppConfig,
    error::{AppError, REQUEST_ID},
    services::{
        AuthService, GroupManager, PermissionManager, RefreshTokenManager, ServiceContext,
        UserManager,
    },
};

/// Header carrying the caller's deadline in milliseconds.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

/// 应用状态
///
/// One service per RPC facade. `db` is absent when the repositories are
/// in-memory.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Option<PgPool>,
    pub auth: Arc<AuthService>,
    pub users: Arc<UserManager>,
    pub groups: Arc<GroupManager>,
    pub permissions: Arc<PermissionManager>,
    pub refresh_tokens: Arc<RefreshTokenManager>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Option<PgPool>, ctx: ServiceContext) -> Self {
        Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(AuthService::new(ctx.clone())),
            users: Arc::new(UserManager::new(ctx.clone())),
            groups: Arc::new(GroupManager::new(ctx.clone())),
            permissions: Arc::new(PermissionManager::new(ctx.clone())),
            refresh_tokens: Arc::new(RefreshTokenManager::new(ctx)),
        }
    }
}

/// 请求追踪中间件
/// 为每个请求记录 request_id / trace_id、耗时与指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = header_or_generate(req.headers(), "x-trace-id");
    let request_id = header_or_generate(req.headers(), REQUEST_ID_KEY);

    let method = req.method().to_string();
    let uri = req.uri().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    let scoped_id = request_id.clone();
    async move {
        let start = Instant::now();

        let mut response = REQUEST_ID.scope(scoped_id, next.run(req)).await;

        let elapsed = start.elapsed();
        let status = response.status().as_u16();
        let status_class = match status {
            200..=299 => "2xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "other",
        };

        metrics::counter!("http_requests_total", "status" => status_class).increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            uri = %uri,
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// Cancels the request once the caller's deadline elapses.
pub async fn request_deadline_middleware(req: Request, next: Next) -> Response {
    let Some(limit) = request_timeout(req.headers()) else {
        return next.run(req).await;
    };

    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "Request deadline exceeded");
            AppError::Canceled("request deadline exceeded".to_string()).into_response()
        }
    }
}

fn request_timeout(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(REQUEST_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn header_or_generate(headers: &HeaderMap, key: &str) -> String {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
