//! OpenAI 兼容请求体
//!
//! 只解析网关关心的字段，其余字段通过 `extra` 原样透传给上游。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::model_registry::ModelType;

// ============================================================================
// Chat Completions
// ============================================================================

/// 消息内容：纯文本或多段内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// 多段内容中的一段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        let mut extra = Map::new();
        extra.insert(
            "image_url".to_string(),
            serde_json::json!({ "url": url.into() }),
        );
        Self {
            kind: "image_url".to_string(),
            text: None,
            extra,
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(MessageContent::Text(content.into())),
            extra: Map::new(),
        }
    }

    pub fn with_parts(role: &str, parts: Vec<ContentPart>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(MessageContent::Parts(parts)),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(model: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            stream: false,
            tools: None,
            tool_choice: None,
            extra: Map::new(),
        }
    }

    /// 是否包含图片等非文本内容
    pub fn has_non_text_parts(&self) -> bool {
        self.messages.iter().any(|m| match &m.content {
            Some(MessageContent::Parts(parts)) => parts.iter().any(|p| !p.is_text()),
            _ => false,
        })
    }

    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// 移除工具定义（模型不支持工具调用时）
    pub fn strip_tools(&mut self) {
        self.tools = None;
        self.tool_choice = None;
    }
}

// ============================================================================
// 其它端点
// ============================================================================

fn default_image_model() -> String {
    "dall-e-2".to_string()
}

fn default_moderation_model() -> String {
    "omni-moderation-latest".to_string()
}

fn default_n() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    #[serde(default = "default_image_model")]
    pub model: String,
    pub prompt: String,
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationRequest {
    #[serde(default = "default_moderation_model")]
    pub model: String,
    pub input: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub model: String,
    pub input: String,
    pub voice: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 转写请求，来自 multipart 表单
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionRequest {
    pub model: String,
    pub file: Vec<u8>,
    pub filename: String,
    /// 除 file/model 外的其它表单字段
    pub fields: Vec<(String, String)>,
}

// ============================================================================
// 统一请求
// ============================================================================

/// 网关接受的请求
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayRequest {
    Chat(ChatRequest),
    Image(ImageRequest),
    Embedding(EmbeddingRequest),
    Moderation(ModerationRequest),
    Speech(SpeechRequest),
    Transcription(TranscriptionRequest),
}

impl GatewayRequest {
    pub fn model(&self) -> &str {
        match self {
            Self::Chat(r) => &r.model,
            Self::Image(r) => &r.model,
            Self::Embedding(r) => &r.model,
            Self::Moderation(r) => &r.model,
            Self::Speech(r) => &r.model,
            Self::Transcription(r) => &r.model,
        }
    }

    /// 替换为上游模型名
    pub fn set_model(&mut self, model: &str) {
        let target = match self {
            Self::Chat(r) => &mut r.model,
            Self::Image(r) => &mut r.model,
            Self::Embedding(r) => &mut r.model,
            Self::Moderation(r) => &mut r.model,
            Self::Speech(r) => &mut r.model,
            Self::Transcription(r) => &mut r.model,
        };
        *target = model.to_string();
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            Self::Chat(_) => ModelType::Chat,
            Self::Image(_) => ModelType::Image,
            Self::Embedding(_) => ModelType::Embedding,
            Self::Moderation(_) => ModelType::Moderation,
            Self::Speech(_) => ModelType::Speech,
            Self::Transcription(_) => ModelType::Transcription,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Chat(r) if r.stream)
    }

    pub fn requires_vision(&self) -> bool {
        matches!(self, Self::Chat(r) if r.has_non_text_parts())
    }

    pub fn requires_tools(&self) -> bool {
        matches!(self, Self::Chat(r) if r.has_tools())
    }

    /// JSON 请求体；转写请求走 multipart，返回 None
    pub fn to_json(&self) -> Option<Value> {
        let value = match self {
            Self::Chat(r) => serde_json::to_value(r),
            Self::Image(r) => serde_json::to_value(r),
            Self::Embedding(r) => serde_json::to_value(r),
            Self::Moderation(r) => serde_json::to_value(r),
            Self::Speech(r) => serde_json::to_value(r),
            Self::Transcription(_) => return None,
        };
        value.ok()
    }
}
