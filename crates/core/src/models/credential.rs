//! 上游凭证模型

use serde::{Deserialize, Serialize};

/// 凭证下某个模型的条目及健康统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialModel {
    /// 发往上游的模型名
    pub api_name: String,
    /// 目录中的模型 ID
    #[serde(alias = "model_id")]
    pub canonical_model_id: String,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    /// 上次失败时间（Unix 秒）
    #[serde(default)]
    pub last_failure_ts: f64,
    /// 平滑后的延迟（毫秒）
    #[serde(default)]
    pub avg_latency: f64,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub supports_tools: bool,
}

impl CredentialModel {
    pub fn new(api_name: impl Into<String>, canonical_model_id: impl Into<String>) -> Self {
        Self {
            api_name: api_name.into(),
            canonical_model_id: canonical_model_id.into(),
            usage_count: 0,
            failure_count: 0,
            last_failure_ts: 0.0,
            avg_latency: 0.0,
            supports_vision: false,
            supports_tools: false,
        }
    }

    pub fn with_vision(mut self) -> Self {
        self.supports_vision = true;
        self
    }

    pub fn with_tools(mut self) -> Self {
        self.supports_tools = true;
        self
    }

    /// 不可用分数：`failures / usage / 100`，无使用记录时视为完全可用
    pub fn unavailability(&self) -> f64 {
        if self.usage_count == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.usage_count as f64 / 100.0
    }
}

/// 上游凭证
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCredential {
    /// 凭证唯一名称
    pub name: String,
    /// 负责调度该凭证的 Provider 实现
    #[serde(default = "default_provider_name")]
    pub provider_name: String,
    pub api_key: String,
    pub base_url: String,
    #[serde(default)]
    pub premium_only: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub models: Vec<CredentialModel>,
}

fn default_provider_name() -> String {
    "openai".to_string()
}

impl ProviderCredential {
    /// 按目录模型 ID 查找条目
    pub fn model(&self, model_id: &str) -> Option<&CredentialModel> {
        self.models
            .iter()
            .find(|m| m.canonical_model_id == model_id)
    }

    pub fn serves(&self, model_id: &str) -> bool {
        self.model(model_id).is_some()
    }
}

/// 凭证部分更新
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialUpdate {
    pub disabled: Option<bool>,
    pub premium_only: Option<bool>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}
