//! 选择策略 trait
//!
//! 策略只负责在已过滤的候选中排序挑选，过滤由凭证池完成。

use async_trait::async_trait;
use thiserror::Error;
use tollway_core::models::credential::ProviderCredential;
use tollway_core::GatewayError;

/// 策略错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("没有可用的凭证: model={0}")]
    NoAvailableCredentials(String),
}

impl From<StrategyError> for GatewayError {
    fn from(err: StrategyError) -> Self {
        match err {
            StrategyError::NoAvailableCredentials(_) => GatewayError::NoProviderAvailable,
        }
    }
}

pub type StrategyResult<T> = Result<T, StrategyError>;

/// 选择上下文
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionContext {
    /// 目录模型 ID
    pub model_id: String,
    /// 是否需要视觉能力
    pub requires_vision: bool,
    /// 是否需要工具调用
    pub requires_tools: bool,
    /// 是否允许使用仅限高级用户的凭证
    pub allow_premium: bool,
    /// 本次请求中已尝试过的凭证
    pub excluded_credentials: Vec<String>,
}

impl SelectionContext {
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            ..Default::default()
        }
    }

    /// 设置视觉需求
    pub fn with_vision(mut self, requires: bool) -> Self {
        self.requires_vision = requires;
        self
    }

    /// 设置工具调用需求
    pub fn with_tools(mut self, requires: bool) -> Self {
        self.requires_tools = requires;
        self
    }

    pub fn with_premium(mut self, allow: bool) -> Self {
        self.allow_premium = allow;
        self
    }

    /// 排除凭证
    pub fn exclude_credential(mut self, name: &str) -> Self {
        self.excluded_credentials.push(name.to_string());
        self
    }

    /// 候选是否满足本次请求
    pub fn accepts(&self, credential: &ProviderCredential) -> bool {
        if credential.disabled
            || (credential.premium_only && !self.allow_premium)
            || self.excluded_credentials.contains(&credential.name)
        {
            return false;
        }
        match credential.model(&self.model_id) {
            Some(model) => {
                (!self.requires_vision || model.supports_vision)
                    && (!self.requires_tools || model.supports_tools)
            }
            None => false,
        }
    }
}

/// 选择策略 trait
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    /// 策略 ID
    fn id(&self) -> &str;

    /// 策略显示名称
    fn display_name(&self) -> &str;

    /// 从候选中选出一个凭证，候选已按上下文过滤
    async fn select(
        &self,
        candidates: &[ProviderCredential],
        ctx: &SelectionContext,
    ) -> StrategyResult<ProviderCredential>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::credential;

    #[test]
    fn test_selection_context_builder() {
        let ctx = SelectionContext::new("gpt-4o")
            .with_vision(true)
            .with_tools(true)
            .with_premium(true)
            .exclude_credential("a");

        assert_eq!(ctx.model_id, "gpt-4o");
        assert!(ctx.requires_vision);
        assert!(ctx.requires_tools);
        assert!(ctx.allow_premium);
        assert_eq!(ctx.excluded_credentials, vec!["a".to_string()]);
    }

    #[test]
    fn test_accepts_filters() {
        let ctx = SelectionContext::new("gpt-4o");
        let plain = credential("a", "gpt-4o");
        assert!(ctx.accepts(&plain));
        assert!(!ctx.accepts(&credential("b", "gpt-4")));

        let mut disabled = plain.clone();
        disabled.disabled = true;
        assert!(!ctx.accepts(&disabled));

        let mut premium = plain.clone();
        premium.premium_only = true;
        assert!(!ctx.accepts(&premium));
        assert!(ctx.clone().with_premium(true).accepts(&premium));

        assert!(!ctx.clone().with_vision(true).accepts(&plain));
        let mut vision = plain.clone();
        vision.models[0].supports_vision = true;
        assert!(ctx.clone().with_vision(true).accepts(&vision));

        assert!(!ctx.exclude_credential("a").accepts(&plain));
    }

    #[test]
    fn test_error_maps_to_no_provider() {
        let err: GatewayError = StrategyError::NoAvailableCredentials("gpt-4o".into()).into();
        assert_eq!(err, GatewayError::NoProviderAvailable);
    }
}
