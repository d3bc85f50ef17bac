//! 轮询策略
//!
//! 在过滤后的候选中按顺序轮询，索引由策略实例持有。

use crate::strategy::{SelectionContext, SelectionStrategy, StrategyError, StrategyResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tollway_core::models::credential::ProviderCredential;

/// 轮询策略
#[derive(Debug)]
pub struct RoundRobinStrategy {
    /// 当前索引
    index: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SelectionStrategy for RoundRobinStrategy {
    fn id(&self) -> &str {
        "round_robin"
    }

    fn display_name(&self) -> &str {
        "轮询"
    }

    async fn select(
        &self,
        candidates: &[ProviderCredential],
        ctx: &SelectionContext,
    ) -> StrategyResult<ProviderCredential> {
        if candidates.is_empty() {
            return Err(StrategyError::NoAvailableCredentials(ctx.model_id.clone()));
        }

        let idx = self.index.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Ok(candidates[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::credential;

    #[tokio::test]
    async fn test_round_robin_selection() {
        let strategy = RoundRobinStrategy::new();
        let candidates = vec![
            credential("cred-1", "gpt-4o"),
            credential("cred-2", "gpt-4o"),
            credential("cred-3", "gpt-4o"),
        ];
        let ctx = SelectionContext::new("gpt-4o");

        let mut picked = Vec::new();
        for _ in 0..4 {
            picked.push(strategy.select(&candidates, &ctx).await.unwrap().name);
        }
        // 第四次回到第一个
        assert_eq!(picked, vec!["cred-1", "cred-2", "cred-3", "cred-1"]);
    }

    #[tokio::test]
    async fn test_round_robin_empty_pool() {
        let strategy = RoundRobinStrategy::new();
        let result = strategy.select(&[], &SelectionContext::new("gpt-4o")).await;
        assert!(result.is_err());
    }
}
