//! 凭证池与上游选择
//!
//! 为每次请求尝试挑选一个上游凭证，并维护按模型的健康统计。
//!
//! ## 模块结构
//! - `strategy`: 选择策略 trait、选择上下文
//! - `strategies`: 内置策略（健康排序、轮询）
//! - `pool`: 凭证池，负责过滤候选并回写统计

pub mod pool;
pub mod strategies;
pub mod strategy;

pub use pool::CredentialPool;
pub use strategies::{create_strategy, HealthRankedStrategy, RoundRobinStrategy};
pub use strategy::{SelectionContext, SelectionStrategy, StrategyError, StrategyResult};
