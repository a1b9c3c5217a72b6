//! 统一错误模型
//! 定义所有错误类型和错误响应格式
//!
//! 错误分类遵循失败关闭原则：
//! - Validation：输入不合法，任何持久化之前拒绝
//! - PolicyViolation：策略拒绝，本身会被持久化为历史
//! - Integrity：校验和不匹配或部分提交，升级事件且绝不自动修复
//! - Timeout / Database：瞬时存储故障，调用方可带同一幂等键重试

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Concurrent write conflict: {0}")]
    Conflict(String),

    #[error("Integrity fault: {0}")]
    Integrity(String),

    #[error("Store operation timed out: {0}")]
    Timeout(String),

    #[error("Internal server error")]
    Internal,
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PolicyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_)
            | AppError::Config(_)
            | AppError::Integrity(_)
            | AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Authentication failed".to_string(),
            AppError::Forbidden => "Access denied".to_string(),
            AppError::NotFound(what) => format!("Resource not found: {}", what),
            AppError::Validation(msg) => msg.clone(),
            AppError::PolicyViolation(msg) => msg.clone(),
            AppError::Conflict(_) => "Concurrent write conflict, retry the operation".to_string(),
            AppError::Integrity(_) => {
                "Integrity fault detected, entry frozen for review".to_string()
            }
            AppError::Timeout(_) => {
                "Store operation timed out, safe to retry with the same idempotency key"
                    .to_string()
            }
            AppError::Database(_) => "Database error occurred".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Internal => "Internal server error".to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    /// 瞬时故障：调用方可安全重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Timeout(_) | AppError::Conflict(_))
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    pub retryable: bool,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                retryable: self.is_retryable(),
                request_id,
            },
        };

        // 记录错误日志
        tracing::error!(
            code = self.code(),
            message = %self,
            request_id = %error_response.error.request_id,
            "Application error"
        );

        (status, Json(error_response)).into_response()
    }
}

/// 从 String 转换为 AppError::Config
impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Config(s)
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::Unauthorized.code(), 401);
        assert_eq!(AppError::Forbidden.code(), 403);
        assert_eq!(AppError::NotFound("record".to_string()).code(), 404);
        assert_eq!(AppError::Validation("test".to_string()).code(), 400);
        assert_eq!(AppError::PolicyViolation("jump".to_string()).code(), 422);
        assert_eq!(AppError::Conflict("busy".to_string()).code(), 409);
        assert_eq!(AppError::Timeout("store".to_string()).code(), 503);
        assert_eq!(AppError::Integrity("mismatch".to_string()).code(), 500);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::Timeout("store".to_string()).is_retryable());
        assert!(AppError::Conflict("busy".to_string()).is_retryable());
        assert!(!AppError::Integrity("mismatch".to_string()).is_retryable());
        assert!(!AppError::PolicyViolation("jump".to_string()).is_retryable());
    }

    #[test]
    fn test_user_message_no_sensitive_info() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        let message = error.user_message();
        assert_eq!(message, "Database error occurred");
        assert!(!message.contains("sqlx"));
    }
}
