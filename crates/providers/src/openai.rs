//! OpenAI 兼容上游
//!
//! 凭证的 `base_url` 需包含版本前缀，例如 `https://api.openai.com/v1`。

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use tollway_core::logger::sanitize_log_message;
use tollway_core::models::credential::ProviderCredential;
use tollway_core::models::openai::{GatewayRequest, TranscriptionRequest};
use tollway_core::{ModelDescriptor, ModelType};

use crate::traits::{Provider, ProviderConfig, UpstreamError, UpstreamResponse};

const OWNER: &str = "openai";
const VOICES: &[&str] = &["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// OpenAI 模型目录
pub fn openai_models() -> Vec<ModelDescriptor> {
    let chat = |id: &str| ModelDescriptor::new(id, ModelType::Chat, OWNER);
    vec![
        chat("gpt-3.5-turbo").tools(),
        chat("gpt-3.5-turbo-1106").tools(),
        chat("gpt-3.5-turbo-0125").tools(),
        chat("gpt-4").multiplier(2.0),
        chat("gpt-4-0613").multiplier(2.0),
        chat("gpt-4-1106-preview").multiplier(1.75).tools(),
        chat("gpt-4-0125-preview").multiplier(1.75).tools(),
        chat("gpt-4-turbo-preview").multiplier(1.75).tools(),
        chat("gpt-4-turbo").multiplier(1.5).tools().vision(),
        chat("gpt-4-turbo-2024-04-09").multiplier(1.5).tools().vision(),
        chat("gpt-4o").multiplier(1.25).tools().vision(),
        chat("gpt-4o-2024-05-13").multiplier(1.25).tools().vision(),
        chat("gpt-4o-2024-08-06").multiplier(1.25).tools().vision(),
        chat("chatgpt-4o-latest").multiplier(1.25).vision(),
        chat("gpt-4o-mini").tools().vision(),
        chat("gpt-4o-mini-2024-07-18").tools().vision(),
        ModelDescriptor::new("dall-e-2", ModelType::Image, OWNER),
        ModelDescriptor::new("dall-e-3", ModelType::Image, OWNER)
            .premium()
            .flat(2500),
        ModelDescriptor::new("text-embedding-ada-002", ModelType::Embedding, OWNER),
        ModelDescriptor::new("text-embedding-3-small", ModelType::Embedding, OWNER),
        ModelDescriptor::new("text-embedding-3-large", ModelType::Embedding, OWNER),
        ModelDescriptor::new("omni-moderation-latest", ModelType::Moderation, OWNER).flat(10),
        ModelDescriptor::new("text-moderation-latest", ModelType::Moderation, OWNER).flat(10),
        ModelDescriptor::new("tts-1", ModelType::Speech, OWNER).voices(VOICES),
        ModelDescriptor::new("tts-1-hd", ModelType::Speech, OWNER)
            .premium()
            .voices(VOICES),
        ModelDescriptor::new("whisper-1", ModelType::Transcription, OWNER),
    ]
}

/// 端点完整 URL
pub fn endpoint_url(base_url: &str, model_type: ModelType) -> String {
    let path = match model_type {
        ModelType::Chat => "chat/completions",
        ModelType::Image => "images/generations",
        ModelType::Embedding => "embeddings",
        ModelType::Moderation => "moderations",
        ModelType::Speech => "audio/speech",
        ModelType::Transcription => "audio/transcriptions",
    };
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

fn transcription_form(request: &TranscriptionRequest) -> Form {
    let file = Part::bytes(request.file.clone()).file_name(request.filename.clone());
    let mut form = Form::new()
        .text("model", request.model.clone())
        .part("file", file);
    for (key, value) in &request.fields {
        form = form.text(key.clone(), value.clone());
    }
    form
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            config: ProviderConfig {
                name: OWNER.to_string(),
                models: openai_models(),
            },
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn dispatch(
        &self,
        credential: &ProviderCredential,
        request: &GatewayRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = endpoint_url(&credential.base_url, request.model_type());
        let builder = self.client.post(&url).bearer_auth(&credential.api_key);
        let builder = match request {
            GatewayRequest::Transcription(transcription) => {
                builder.multipart(transcription_form(transcription))
            }
            other => {
                let body = other
                    .to_json()
                    .ok_or_else(|| UpstreamError::transport("请求体序列化失败"))?;
                builder.json(&body)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::transport(format!("请求失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::status(
                status.as_u16(),
                sanitize_log_message(&body),
            ));
        }

        if request.is_stream() {
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| UpstreamError::transport(format!("读取流失败: {e}"))));
            return Ok(UpstreamResponse::Stream(Box::pin(stream)));
        }

        if request.model_type() == ModelType::Speech {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("audio/mpeg")
                .to_string();
            let body = response
                .bytes()
                .await
                .map_err(|e| UpstreamError::transport(format!("读取音频失败: {e}")))?;
            return Ok(UpstreamResponse::Binary { content_type, body });
        }

        let value = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| UpstreamError::transport(format!("解析响应失败: {e}")))?;
        Ok(UpstreamResponse::Json(value))
    }
}
