//! 请求调度 crate
//!
//! 把已认证用户的请求走完 估算 -> 余额检查 -> 选择凭证 -> 上游调用 -> 结算 的流程。
//!
//! ## 模块结构
//!
//! - `context` - 请求上下文与调度状态机
//! - `processor` - 调度器
//! - `steps` - 重试/故障转移、流式计费

pub mod context;
pub mod processor;
pub mod steps;

pub use context::{DispatchStage, RequestContext};
pub use processor::{DispatchOutcome, RequestProcessor};
pub use steps::*;
