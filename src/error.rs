//! 统一错误模型
//! RPC 边界上的状态码、错误响应格式，以及存储层错误的翻译

use crate::repository::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// Status codes surfaced on the RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Canceled,
    Internal,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::Unauthenticated => "UNAUTHENTICATED",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Canceled => "CANCELED",
            Code::Internal => "INTERNAL",
        }
    }
}

/// 应用错误类型
///
/// Every variant carries a short English hint. The hint is informative only,
/// callers must branch on [`AppError::code`].
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("canceled: {0}")]
    Canceled(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn code(&self) -> Code {
        match self {
            AppError::InvalidArgument(_) => Code::InvalidArgument,
            AppError::Unauthenticated(_) => Code::Unauthenticated,
            AppError::PermissionDenied(_) => Code::PermissionDenied,
            AppError::NotFound(_) => Code::NotFound,
            AppError::AlreadyExists(_) => Code::AlreadyExists,
            AppError::FailedPrecondition(_) => Code::FailedPrecondition,
            AppError::Canceled(_) => Code::Canceled,
            AppError::Internal(_) | AppError::Config(_) => Code::Internal,
        }
    }

    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self.code() {
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists => StatusCode::CONFLICT,
            Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            // 499 Client Closed Request
            Code::Canceled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidArgument(msg)
            | AppError::Unauthenticated(msg)
            | AppError::PermissionDenied(msg)
            | AppError::NotFound(msg)
            | AppError::AlreadyExists(msg)
            | AppError::FailedPrecondition(msg)
            | AppError::Canceled(msg)
            | AppError::Internal(msg) => msg.clone(),
            AppError::Config(_) => "Configuration error".to_string(),
        }
    }

    // 便捷方法
    pub fn invalid_argument(msg: &str) -> Self {
        AppError::InvalidArgument(msg.to_string())
    }

    pub fn unauthenticated(msg: &str) -> Self {
        AppError::Unauthenticated(msg.to_string())
    }

    pub fn permission_denied(msg: &str) -> Self {
        AppError::PermissionDenied(msg.to_string())
    }

    pub fn not_found(msg: &str) -> Self {
        AppError::NotFound(msg.to_string())
    }

    pub fn already_exists(msg: &str) -> Self {
        AppError::AlreadyExists(msg.to_string())
    }

    pub fn failed_precondition(msg: &str) -> Self {
        AppError::FailedPrecondition(msg.to_string())
    }

    /// Internal failure: the cause is logged, only the hint leaves the process.
    pub fn internal(msg: &str, cause: impl Display) -> Self {
        tracing::error!(cause = %cause, "{}", msg);
        AppError::Internal(msg.to_string())
    }

    /// Default translation of a storage failure into a status code.
    ///
    /// Handlers that give a constraint a more specific meaning (for example
    /// a foreign key on delete) match on the [`StorageError`] first.
    pub fn storage(msg: &str, err: StorageError) -> Self {
        match err {
            StorageError::NotFound => AppError::NotFound(msg.to_string()),
            StorageError::UniqueViolation(constraint) => {
                tracing::debug!(constraint = %constraint, "unique constraint violated");
                AppError::AlreadyExists(msg.to_string())
            }
            StorageError::ForeignKeyViolation(constraint) => {
                tracing::debug!(constraint = %constraint, "foreign key constraint violated");
                AppError::NotFound(format!("{}, referenced entity does not exist", msg))
            }
            StorageError::NotNullViolation(column) => {
                AppError::InvalidArgument(format!("{}, {} is required", msg, column))
            }
            StorageError::CheckViolation(constraint) => {
                tracing::debug!(constraint = %constraint, "check constraint violated");
                AppError::InvalidArgument(msg.to_string())
            }
            StorageError::Canceled => AppError::Canceled(msg.to_string()),
            other => AppError::internal(msg, other),
        }
    }
}

tokio::task_local! {
    /// Request id of the request being served, set by the tracking middleware.
    pub static REQUEST_ID: String;
}

/// The current request id, or a fresh one outside a tracked request.
pub fn current_request_id() -> String {
    REQUEST_ID
        .try_with(Clone::clone)
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
}

/// 错误响应 DTO
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: Code,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = current_request_id();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                request_id,
            },
        };

        // 记录错误日志
        if status.is_server_error() {
            tracing::error!(
                code = self.code().as_str(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Application error"
            );
        } else {
            tracing::info!(
                code = self.code().as_str(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Request rejected"
            );
        }

        (status, Json(error_response)).into_response()
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}
