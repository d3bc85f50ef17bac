//! Provider trait
//!
//! 每个 Provider 声明自己支持的模型，并负责把请求发往某个凭证对应的上游。

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tollway_core::models::credential::ProviderCredential;
use tollway_core::models::openai::GatewayRequest;
use tollway_core::ModelDescriptor;

/// 上游原始字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

/// 上游调用错误
#[derive(Debug, Clone, Error, PartialEq)]
#[error("上游请求失败: status={status:?} message={message}")]
pub struct UpstreamError {
    /// 上游 HTTP 状态码，网络错误或超时时为 None
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::transport(format!("上游请求超时 ({timeout_ms}ms)"))
    }
}

/// 上游响应
pub enum UpstreamResponse {
    Json(serde_json::Value),
    /// 语音合成等二进制响应
    Binary { content_type: String, body: Bytes },
    /// SSE 流
    Stream(ByteStream),
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Binary { content_type, body } => f
                .debug_struct("Binary")
                .field("content_type", content_type)
                .field("len", &body.len())
                .finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Provider 配置
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// 与凭证的 `provider_name` 对应
    pub name: String,
    /// 支持的模型目录
    pub models: Vec<ModelDescriptor>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn config(&self) -> &ProviderConfig;

    /// 使用指定凭证发送请求，请求中的模型名已替换为上游名称
    async fn dispatch(
        &self,
        credential: &ProviderCredential,
        request: &GatewayRequest,
    ) -> Result<UpstreamResponse, UpstreamError>;
}
