//! 错误类型模块
//!
//! ## 模块结构
//! - `gateway_error`: 网关对外错误分类与 OpenAI 风格错误信封

pub mod gateway_error;

pub use gateway_error::{ErrorBody, ErrorEnvelope, ErrorType, GatewayError, GatewayResult};
