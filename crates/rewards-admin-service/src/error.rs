//! 管理后台错误类型定义
//!
//! 领域错误透传核心库的错误码，按类别映射 HTTP 状态码

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rewards_core::RewardsError;
use serde_json::json;

/// 管理后台错误类型
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error(transparent)]
    Core(#[from] RewardsError),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl AdminError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Core(e) => match e {
                RewardsError::Validation(_) => StatusCode::BAD_REQUEST,
                RewardsError::UserNotFound(_)
                | RewardsError::ProductNotFound(_)
                | RewardsError::JobNotFound(_) => StatusCode::NOT_FOUND,
                RewardsError::Contention { .. } | RewardsError::StoreUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                RewardsError::Transport(_)
                | RewardsError::Serialization(_)
                | RewardsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                // 其余都是与当前状态冲突的业务错误
                _ => StatusCode::CONFLICT,
            },
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Core(e) => e.error_code(),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "请求处理失败");
            "服务内部错误，请稍后重试".to_string()
        } else if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::warn!(error = %self, "存储暂不可用");
            "服务繁忙，请稍后重试".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for AdminError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AdminError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn all_error_variants() -> Vec<(AdminError, StatusCode, &'static str)> {
        vec![
            (AdminError::Validation("message".into()), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (AdminError::NotFound("route".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (AdminError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            (RewardsError::JobNotFound("j1".into()).into(), StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
            (RewardsError::UserNotFound("u1".into()).into(), StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            (RewardsError::Validation("bad".into()).into(), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (
                RewardsError::InsufficientBalance { required: 10, available: 5 }.into(),
                StatusCode::CONFLICT,
                "INSUFFICIENT_BALANCE",
            ),
            (RewardsError::NoActiveSession.into(), StatusCode::CONFLICT, "NO_ACTIVE_SESSION"),
            (
                RewardsError::Contention { path: "users/1".into() }.into(),
                StatusCode::SERVICE_UNAVAILABLE,
                "CONTENTION",
            ),
            (
                RewardsError::StoreUnavailable("timeout".into()).into(),
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
            ),
            (RewardsError::Internal("x".into()).into(), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        ]
    }

    #[test]
    fn test_status_and_code_mapping() {
        for (err, status, code) in all_error_variants() {
            assert_eq!(err.status_code(), status, "{err}");
            assert_eq!(err.error_code(), code, "{err}");
        }
    }

    #[test]
    fn test_into_response_status() {
        for (err, status, _) in all_error_variants() {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
