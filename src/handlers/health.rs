//! 健康检查处理器

use axum::{extract::State, http::StatusCode, Json};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::{db, middleware::AppState};

static START: OnceCell<Instant> = OnceCell::new();

/// 设置应用启动时间
pub fn set_start_time() {
    let _ = START.set(Instant::now());
}

fn uptime_secs() -> u64 {
    START.get().map_or(0, |start| start.elapsed().as_secs())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Liveness plus database connectivity. Without a database (in-memory
/// storage) the check is reported as skipped.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let (status, database, message) = match &state.db {
        None => (StatusCode::OK, "skipped", None),
        Some(pool) => match db::health_check(pool).await {
            db::HealthStatus::Healthy => (StatusCode::OK, "healthy", None),
            db::HealthStatus::Unhealthy(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", Some(msg))
            }
        },
    };

    let response = HealthResponse {
        status: if status.is_success() { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime_secs(),
        database: database.to_string(),
        message,
    };

    (status, Json(response))
}
