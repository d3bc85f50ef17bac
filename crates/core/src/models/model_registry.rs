//! 模型目录
//!
//! 进程启动时由各 Provider 注册其支持的模型，之后只读。

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::GatewayError;

/// 模型所属端点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    #[serde(rename = "chat.completions")]
    Chat,
    #[serde(rename = "images.generations")]
    Image,
    #[serde(rename = "embeddings")]
    Embedding,
    #[serde(rename = "moderations")]
    Moderation,
    #[serde(rename = "audio.speech")]
    Speech,
    #[serde(rename = "audio.transcriptions")]
    Transcription,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat.completions",
            Self::Image => "images.generations",
            Self::Embedding => "embeddings",
            Self::Moderation => "moderations",
            Self::Speech => "audio.speech",
            Self::Transcription => "audio.transcriptions",
        }
    }

    /// 对外暴露的端点路径
    pub fn endpoint(&self) -> String {
        format!("/v1/{}", self.as_str().replace('.', "/"))
    }

    /// 解析查询参数，兼容 `chat` 这类简写
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chat" | "chat.completions" => Some(Self::Chat),
            "image" | "images" | "images.generations" => Some(Self::Image),
            "embedding" | "embeddings" => Some(Self::Embedding),
            "moderation" | "moderations" => Some(Self::Moderation),
            "speech" | "audio.speech" => Some(Self::Speech),
            "transcription" | "transcriptions" | "audio.transcriptions" => {
                Some(Self::Transcription)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 计价方式
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pricing {
    /// 按 token 计价，乘以倍率
    PerToken { multiplier: f64 },
    /// 固定费用
    Flat { cost: u64 },
}

impl Pricing {
    pub fn per_token() -> Self {
        Self::PerToken { multiplier: 1.0 }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            Self::PerToken { multiplier } => *multiplier,
            Self::Flat { .. } => 1.0,
        }
    }
}

/// 模型描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model_id: String,
    pub model_type: ModelType,
    pub owned_by: String,
    pub premium: bool,
    pub pricing: Pricing,
    pub supports_vision: bool,
    pub supports_tools: bool,
    pub supports_streaming: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub voices: Vec<String>,
}

impl ModelDescriptor {
    pub fn new(model_id: impl Into<String>, model_type: ModelType, owned_by: &str) -> Self {
        Self {
            model_id: model_id.into(),
            model_type,
            owned_by: owned_by.to_string(),
            premium: false,
            pricing: Pricing::per_token(),
            supports_vision: false,
            supports_tools: false,
            supports_streaming: model_type == ModelType::Chat,
            voices: Vec::new(),
        }
    }

    pub fn premium(mut self) -> Self {
        self.premium = true;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.pricing = Pricing::PerToken { multiplier };
        self
    }

    pub fn flat(mut self, cost: u64) -> Self {
        self.pricing = Pricing::Flat { cost };
        self
    }

    pub fn vision(mut self) -> Self {
        self.supports_vision = true;
        self
    }

    pub fn tools(mut self) -> Self {
        self.supports_tools = true;
        self
    }

    pub fn voices(mut self, voices: &[&str]) -> Self {
        self.voices = voices.iter().map(|v| v.to_string()).collect();
        self
    }

    /// `/v1/models` 列表中的条目
    pub fn to_list_entry(&self) -> serde_json::Value {
        let (amount, multiplier) = match self.pricing {
            Pricing::PerToken { multiplier } => (serde_json::Value::from("per_token"), multiplier),
            Pricing::Flat { cost } => (serde_json::Value::from(cost), 1.0),
        };
        let mut entry = serde_json::json!({
            "id": self.model_id,
            "object": "model",
            "owned_by": self.owned_by,
            "type": self.model_type.as_str(),
            "premium_only": self.premium,
            "supports_vision": self.supports_vision,
            "supports_tools": self.supports_tools,
            "pricing": {
                "amount": amount,
                "multiplier": multiplier,
            },
            "endpoint": self.model_type.endpoint(),
        });
        if !self.voices.is_empty() {
            entry["voices"] = serde_json::json!(self.voices);
        }
        entry
    }
}

/// 目录筛选条件
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelFilter {
    pub model_type: Option<ModelType>,
    pub premium: Option<bool>,
}

impl ModelFilter {
    pub fn of_type(model_type: ModelType) -> Self {
        Self {
            model_type: Some(model_type),
            premium: None,
        }
    }

    fn matches(&self, descriptor: &ModelDescriptor) -> bool {
        self.model_type.map_or(true, |t| t == descriptor.model_type)
            && self.premium.map_or(true, |p| p == descriptor.premium)
    }
}

/// 模型目录，保持注册顺序
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册模型，重复 ID 以首次注册为准
    pub fn register(&mut self, descriptor: ModelDescriptor) -> bool {
        if self.models.contains_key(&descriptor.model_id) {
            tracing::warn!(
                "[REGISTRY] 模型重复注册，已忽略: model={} owner={}",
                descriptor.model_id,
                descriptor.owned_by
            );
            return false;
        }
        self.models.insert(descriptor.model_id.clone(), descriptor);
        true
    }

    pub fn register_all(&mut self, descriptors: impl IntoIterator<Item = ModelDescriptor>) {
        for descriptor in descriptors {
            self.register(descriptor);
        }
    }

    /// 查询模型描述
    pub fn describe(&self, model_id: &str) -> Result<&ModelDescriptor, GatewayError> {
        self.models
            .get(model_id)
            .ok_or_else(|| GatewayError::model_not_found(model_id))
    }

    pub fn list_all(&self, filter: ModelFilter) -> Vec<&ModelDescriptor> {
        self.models.values().filter(|d| filter.matches(d)).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
