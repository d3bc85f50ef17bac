//! 网关统一错误模型
//!
//! 所有对外错误都序列化为 `{"error": {"message", "type", "param", "code"}}`。
//! 上游和内部错误只返回通用文案，细节只进日志。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 上游或内部错误时对外返回的通用文案
pub const GENERIC_ERROR_MESSAGE: &str =
    "We're sorry, something went wrong. Please try again later.";

/// 错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequestError,
    InvalidResponseError,
    UnexpectedError,
}

/// 错误信封内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub param: Option<String>,
    pub code: Option<String>,
}

/// 错误信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

/// 网关错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// 请求参数或模型校验失败
    #[error("{message}")]
    Validation {
        message: String,
        param: Option<String>,
        code: Option<String>,
        status: u16,
    },

    /// 密钥缺失、无效或已封禁
    #[error("{message}")]
    Authentication {
        message: String,
        code: &'static str,
        status: u16,
    },

    /// 已认证但无权访问（如 IP 绑定不符）
    #[error("{0}")]
    Access(String),

    #[error("You have {available} credits left. This request requires {required} credits.")]
    InsufficientCredits { available: i64, required: u64 },

    #[error("You are being rate limited. Please slow down.")]
    RateLimited,

    #[error("No provider available.")]
    NoProviderAvailable,

    /// 上游调用失败，对外不暴露细节
    #[error("上游错误: provider={provider} status={status:?} message={message}")]
    Upstream {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 网关结果类型
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            param: None,
            code: None,
            status: 400,
        }
    }

    pub fn model_not_found(model: &str) -> Self {
        Self::Validation {
            message: format!("The model `{model}` does not exist."),
            param: Some("model".to_string()),
            code: Some("model_not_found".to_string()),
            status: 404,
        }
    }

    pub fn model_forbidden(model: &str) -> Self {
        Self::Validation {
            message: format!("You don't have permission to use `{model}`."),
            param: Some("model".to_string()),
            code: Some("model_forbidden".to_string()),
            status: 400,
        }
    }

    pub fn missing_key() -> Self {
        Self::Authentication {
            message: "You didn't provide an API key. Provide it in the Authorization header (Bearer <key>).".to_string(),
            code: "missing_key",
            status: 401,
        }
    }

    pub fn invalid_key() -> Self {
        Self::Authentication {
            message: "Invalid API key provided.".to_string(),
            code: "invalid_key",
            status: 401,
        }
    }

    pub fn banned_key() -> Self {
        Self::Authentication {
            message: "Your API key has been banned.".to_string(),
            code: "banned_key",
            status: 403,
        }
    }

    pub fn upstream(provider: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.to_string(),
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { status, .. } => *status,
            Self::Authentication { status, .. } => *status,
            Self::Access(_) => 403,
            Self::InsufficientCredits { .. } | Self::RateLimited => 429,
            Self::NoProviderAvailable => 503,
            Self::Upstream { .. } | Self::Internal(_) => 500,
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Upstream { .. } => ErrorType::InvalidResponseError,
            Self::Internal(_) => ErrorType::UnexpectedError,
            _ => ErrorType::InvalidRequestError,
        }
    }

    /// 是否为不应向客户端暴露细节的错误
    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Internal(_))
    }

    /// 对外文案
    pub fn client_message(&self) -> String {
        if self.is_opaque() {
            GENERIC_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }

    fn code(&self) -> Option<String> {
        match self {
            Self::Validation { code, .. } => code.clone(),
            Self::Authentication { code, .. } => Some(code.to_string()),
            Self::Access(_) => Some("access_denied".to_string()),
            Self::InsufficientCredits { .. } => Some("insufficient_credits".to_string()),
            Self::RateLimited => Some("rate_limited".to_string()),
            Self::NoProviderAvailable => Some("no_provider_available".to_string()),
            Self::Upstream { .. } | Self::Internal(_) => None,
        }
    }

    /// 构建对外错误信封
    pub fn to_envelope(&self) -> ErrorEnvelope {
        let param = match self {
            Self::Validation { param, .. } => param.clone(),
            _ => None,
        };
        ErrorEnvelope {
            error: ErrorBody {
                message: self.client_message(),
                error_type: self.error_type(),
                param,
                code: self.code(),
            },
        }
    }
}
