//! Provider 系统模块
//!
//! - `traits`: Provider trait 与上游响应类型
//! - `openai`: OpenAI 兼容上游实现
//! - `registry`: 启动时显式注册的 Provider 列表
//! - `sse`: 上游 SSE 字节流按行解码

pub mod openai;
pub mod registry;
pub mod sse;
pub mod traits;

pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;
pub use sse::SseLineBuffer;
pub use traits::{ByteStream, Provider, ProviderConfig, UpstreamError, UpstreamResponse};
