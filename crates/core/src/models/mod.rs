//! 数据模型
//!
//! - `account`: 调用方账户
//! - `credential`: 上游凭证及其按模型统计
//! - `model_registry`: 模型目录
//! - `openai`: OpenAI 兼容请求体

pub mod account;
pub mod credential;
pub mod model_registry;
pub mod openai;

pub use account::{User, UserUpdate};
pub use credential::{CredentialModel, CredentialUpdate, ProviderCredential};
pub use openai::GatewayRequest;
