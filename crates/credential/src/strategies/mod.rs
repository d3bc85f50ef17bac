//! 内置选择策略
//!
//! 两种策略互斥，由配置 `dispatch.strategy` 选定。

mod health_ranked;
mod round_robin;

pub use health_ranked::HealthRankedStrategy;
pub use round_robin::RoundRobinStrategy;

use super::strategy::SelectionStrategy;
use std::sync::Arc;
use tollway_core::config::SelectionStrategyKind;

/// 按配置创建策略实例
pub fn create_strategy(kind: SelectionStrategyKind) -> Arc<dyn SelectionStrategy> {
    let strategy: Arc<dyn SelectionStrategy> = match kind {
        SelectionStrategyKind::HealthRanked => Arc::new(HealthRankedStrategy::new()),
        SelectionStrategyKind::RoundRobin => Arc::new(RoundRobinStrategy::new()),
    };
    tracing::info!(
        "[POOL] 使用选择策略: {} ({})",
        strategy.id(),
        strategy.display_name()
    );
    strategy
}
