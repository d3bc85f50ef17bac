//! 健康排序策略
//!
//! 依次按使用次数、不可用分数、上次失败时间、平均延迟升序排序，取第一个。

use crate::strategy::{SelectionContext, SelectionStrategy, StrategyError, StrategyResult};
use async_trait::async_trait;
use std::cmp::Ordering;
use tollway_core::models::credential::{CredentialModel, ProviderCredential};

/// 健康排序策略
#[derive(Debug, Default)]
pub struct HealthRankedStrategy;

impl HealthRankedStrategy {
    pub fn new() -> Self {
        Self
    }
}

/// 排序比较，统计越少越健康越靠前
fn compare_health(a: &CredentialModel, b: &CredentialModel) -> Ordering {
    a.usage_count
        .cmp(&b.usage_count)
        .then_with(|| a.unavailability().total_cmp(&b.unavailability()))
        .then_with(|| a.last_failure_ts.total_cmp(&b.last_failure_ts))
        .then_with(|| a.avg_latency.total_cmp(&b.avg_latency))
}

#[async_trait]
impl SelectionStrategy for HealthRankedStrategy {
    fn id(&self) -> &str {
        "health_ranked"
    }

    fn display_name(&self) -> &str {
        "健康排序"
    }

    async fn select(
        &self,
        candidates: &[ProviderCredential],
        ctx: &SelectionContext,
    ) -> StrategyResult<ProviderCredential> {
        candidates
            .iter()
            .filter_map(|c| c.model(&ctx.model_id).map(|m| (c, m)))
            .min_by(|(_, a), (_, b)| compare_health(a, b))
            .map(|(c, _)| c.clone())
            .ok_or_else(|| StrategyError::NoAvailableCredentials(ctx.model_id.clone()))
    }
}
