//! 推送分发错误类型
//!
//! 只有三类错误会返回给调用方：身份未认证、参数非法、推送服务调用失败。
//! 单个 token 的投递失败不属于错误，它们作为正常数据计入 `DispatchResult`。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::{CallableErrorBody, CallableErrorDetail};
use crate::sender::PushError;

/// 推送服务调用失败时返回给调用方的固定提示
pub const INTERNAL_MESSAGE: &str = "An error occurred while sending the notification.";

/// 未认证时返回给调用方的固定提示
pub const UNAUTHENTICATED_MESSAGE: &str = "The function must be called while authenticated.";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    InvalidArgument(String),

    /// 推送服务调用本身失败，保留原始错误供排查
    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: PushError,
    },
}

impl DispatchError {
    pub fn unauthenticated() -> Self {
        Self::Unauthenticated(UNAUTHENTICATED_MESSAGE.to_string())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn internal(source: PushError) -> Self {
        Self::Internal {
            message: INTERNAL_MESSAGE.to_string(),
            source,
        }
    }

    /// 可调用协议中的规范错误码
    pub fn status(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 指标标签
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Internal { .. } => "internal",
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let details = match &self {
            Self::Internal { source, .. } => Some(serde_json::Value::String(source.to_string())),
            _ => None,
        };

        let body = CallableErrorBody {
            error: CallableErrorDetail {
                status: self.status().to_string(),
                message: self.to_string(),
                details,
            },
        };

        (status, axum::Json(body)).into_response()
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, DispatchError>;
