//! Provider 注册表
//!
//! 启动时按显式列表注册，不做运行时发现。

use std::sync::Arc;

use indexmap::IndexMap;
use tollway_core::ModelRegistry;

use crate::openai::OpenAiProvider;
use crate::traits::Provider;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: IndexMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置 Provider 列表
    pub fn builtin(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiProvider::new(client)));
        registry
    }

    /// 注册 Provider，同名时替换
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.config().name.clone();
        tracing::info!(
            "[REGISTRY] 注册 Provider: name={} models={}",
            name,
            provider.config().models.len()
        );
        if self.providers.insert(name.clone(), provider).is_some() {
            tracing::warn!("[REGISTRY] Provider 已被替换: name={}", name);
        }
    }

    pub fn get(&self, provider_name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(provider_name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// 汇总所有 Provider 的模型目录
    pub fn model_registry(&self) -> ModelRegistry {
        let mut models = ModelRegistry::new();
        for provider in self.providers.values() {
            models.register_all(provider.config().models.iter().cloned());
        }
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ProviderConfig, UpstreamError, UpstreamResponse};
    use async_trait::async_trait;
    use tollway_core::models::credential::ProviderCredential;
    use tollway_core::models::openai::GatewayRequest;
    use tollway_core::{ModelDescriptor, ModelFilter, ModelType};

    struct Fixed(ProviderConfig);

    #[async_trait]
    impl Provider for Fixed {
        fn config(&self) -> &ProviderConfig {
            &self.0
        }

        async fn dispatch(
            &self,
            _credential: &ProviderCredential,
            _request: &GatewayRequest,
        ) -> Result<UpstreamResponse, UpstreamError> {
            Ok(UpstreamResponse::Json(serde_json::json!({})))
        }
    }

    #[test]
    fn test_builtin_exposes_openai_catalog() {
        let registry = ProviderRegistry::builtin(reqwest::Client::new());
        assert_eq!(registry.names(), vec!["openai"]);
        assert!(registry.get("openai").is_some());
        assert!(registry.get("missing").is_none());

        let models = registry.model_registry();
        let chat = models.describe("gpt-4o").unwrap();
        assert_eq!(chat.model_type, ModelType::Chat);
        assert!(!models.list_all(ModelFilter::of_type(ModelType::Speech)).is_empty());
    }

    #[test]
    fn test_first_provider_wins_on_duplicate_model() {
        let mut registry = ProviderRegistry::builtin(reqwest::Client::new());
        registry.register(Arc::new(Fixed(ProviderConfig {
            name: "mirror".to_string(),
            models: vec![
                ModelDescriptor::new("gpt-4o", ModelType::Chat, "mirror"),
                ModelDescriptor::new("mirror-1", ModelType::Chat, "mirror"),
            ],
        })));

        let models = registry.model_registry();
        assert_eq!(models.describe("gpt-4o").unwrap().owned_by, "openai");
        assert_eq!(models.describe("mirror-1").unwrap().owned_by, "mirror");
    }
}
