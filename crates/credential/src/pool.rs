//! 凭证池
//!
//! 负责候选过滤、委托策略挑选，以及回写使用/失败统计。
//! 所有计数修改都是存储侧的原子自增。

use std::sync::Arc;

use crate::strategy::{SelectionContext, SelectionStrategy, StrategyError};
use tollway_core::config::SelectionStrategyKind;
use tollway_core::models::credential::{CredentialUpdate, ProviderCredential};
use tollway_core::{GatewayError, GatewayResult, GatewayStore};

pub struct CredentialPool {
    store: Arc<dyn GatewayStore>,
    strategy: Arc<dyn SelectionStrategy>,
}

impl CredentialPool {
    pub fn new(store: Arc<dyn GatewayStore>, strategy: Arc<dyn SelectionStrategy>) -> Self {
        Self { store, strategy }
    }

    pub fn with_kind(store: Arc<dyn GatewayStore>, kind: SelectionStrategyKind) -> Self {
        Self::new(store, crate::strategies::create_strategy(kind))
    }

    pub fn strategy_id(&self) -> &str {
        self.strategy.id()
    }

    /// 为本次尝试挑选凭证
    pub async fn select_best(&self, ctx: &SelectionContext) -> GatewayResult<ProviderCredential> {
        let candidates: Vec<ProviderCredential> = self
            .store
            .find_providers(&ctx.model_id)
            .await?
            .into_iter()
            .filter(|c| ctx.accepts(c))
            .collect();

        if candidates.is_empty() {
            tracing::warn!(
                "[POOL] 没有可用凭证: model={} vision={} tools={} premium={} excluded={:?}",
                ctx.model_id,
                ctx.requires_vision,
                ctx.requires_tools,
                ctx.allow_premium,
                ctx.excluded_credentials
            );
            return Err(StrategyError::NoAvailableCredentials(ctx.model_id.clone()).into());
        }

        let selected = self.strategy.select(&candidates, ctx).await?;
        tracing::debug!(
            "[POOL] 选中凭证: credential={} model={} candidates={} strategy={}",
            selected.name,
            ctx.model_id,
            candidates.len(),
            self.strategy.id()
        );
        Ok(selected)
    }

    /// 记录成功
    ///
    /// 有输出时延迟样本为每单位输出的耗时，流式请求传 0 直接用首包耗时。
    pub async fn record_success(
        &self,
        name: &str,
        model_id: &str,
        elapsed_ms: u64,
        output_size: usize,
    ) -> GatewayResult<()> {
        let sample = if output_size > 0 {
            elapsed_ms as f64 / output_size as f64
        } else {
            elapsed_ms as f64
        };
        let updated = self
            .store
            .record_model_success(name, model_id, sample)
            .await?;
        if !updated {
            tracing::warn!("[POOL] 记录成功时未找到凭证模型: credential={} model={}", name, model_id);
        }
        Ok(())
    }

    /// 记录失败
    pub async fn record_failure(&self, name: &str, model_id: &str) -> GatewayResult<()> {
        let updated = self
            .store
            .record_model_failure(name, model_id, tollway_core::unix_now_f64())
            .await?;
        if !updated {
            tracing::warn!("[POOL] 记录失败时未找到凭证模型: credential={} model={}", name, model_id);
        }
        Ok(())
    }

    /// 下线凭证，之后不再参与选择
    pub async fn disable(&self, name: &str) -> GatewayResult<bool> {
        tracing::warn!("[POOL] 凭证已下线: credential={}", name);
        self.set_disabled(name, true).await
    }

    /// 重新启用凭证（管理操作）
    pub async fn enable(&self, name: &str) -> GatewayResult<bool> {
        tracing::info!("[POOL] 凭证已启用: credential={}", name);
        self.set_disabled(name, false).await
    }

    async fn set_disabled(&self, name: &str, disabled: bool) -> GatewayResult<bool> {
        let update = CredentialUpdate {
            disabled: Some(disabled),
            ..Default::default()
        };
        Ok(self.store.update_provider(name, &update).await?)
    }

    /// 清零统计（管理操作）
    pub async fn reset_stats(&self, name: &str) -> GatewayResult<usize> {
        Ok(self.store.reset_model_stats(name).await?)
    }

    /// 新增或更新凭证，已有统计保留
    pub async fn upsert(&self, credential: &ProviderCredential) -> GatewayResult<()> {
        if credential.models.is_empty() {
            return Err(GatewayError::validation(format!(
                "Credential `{}` must declare at least one model.",
                credential.name
            )));
        }
        Ok(self.store.upsert_provider(credential).await?)
    }

    pub async fn list(&self) -> GatewayResult<Vec<ProviderCredential>> {
        Ok(self.store.list_providers().await?)
    }
}
