//! OpenAI 兼容端点处理器

use axum::{
    body::Bytes,
    extract::{Multipart, Query, State},
    response::Response,
    Extension, Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tollway_core::models::account::User;
use tollway_core::models::openai::{
    ChatRequest, EmbeddingRequest, GatewayRequest, ImageRequest, ModerationRequest,
    SpeechRequest, TranscriptionRequest,
};
use tollway_core::{GatewayError, ModelFilter, ModelType};

use crate::response::{outcome_response, ApiResult};
use crate::state::AppState;

const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::validation(format!("Invalid request body: {e}")))
}

async fn dispatch(state: &AppState, user: &User, request: GatewayRequest) -> ApiResult<Response> {
    let outcome = state.processor.process(user, request).await?;
    Ok(outcome_response(outcome))
}

pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    body: Bytes,
) -> ApiResult<Response> {
    let request: ChatRequest = parse_body(&body)?;
    dispatch(&state, &user, GatewayRequest::Chat(request)).await
}

pub async fn images_generations(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    body: Bytes,
) -> ApiResult<Response> {
    let request: ImageRequest = parse_body(&body)?;
    dispatch(&state, &user, GatewayRequest::Image(request)).await
}

pub async fn embeddings(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    body: Bytes,
) -> ApiResult<Response> {
    let request: EmbeddingRequest = parse_body(&body)?;
    dispatch(&state, &user, GatewayRequest::Embedding(request)).await
}

pub async fn moderations(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    body: Bytes,
) -> ApiResult<Response> {
    let request: ModerationRequest = parse_body(&body)?;
    dispatch(&state, &user, GatewayRequest::Moderation(request)).await
}

pub async fn audio_speech(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    body: Bytes,
) -> ApiResult<Response> {
    let request: SpeechRequest = parse_body(&body)?;
    dispatch(&state, &user, GatewayRequest::Speech(request)).await
}

/// 转写请求走 multipart：`file` 必填，`model` 缺省为 whisper-1，其余字段原样转发
pub async fn audio_transcriptions(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut model = None;
    let mut file = None;
    let mut fields = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::validation(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("audio").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::validation(format!("Invalid file field: {e}")))?;
                file = Some((filename, data.to_vec()));
            }
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| GatewayError::validation(format!("Invalid form field: {e}")))?;
                if name == "model" {
                    model = Some(value);
                } else if !name.is_empty() {
                    fields.push((name, value));
                }
            }
        }
    }

    let (filename, file) = file.ok_or_else(|| GatewayError::Validation {
        message: "`file` is required.".to_string(),
        param: Some("file".to_string()),
        code: None,
        status: 400,
    })?;
    let request = TranscriptionRequest {
        model: model.unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),
        file,
        filename,
        fields,
    };
    dispatch(&state, &user, GatewayRequest::Transcription(request)).await
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelsQuery {
    #[serde(rename = "type")]
    pub model_type: Option<String>,
    pub premium: Option<bool>,
}

/// `GET /v1/models`，无需认证
pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
) -> ApiResult<Json<Value>> {
    let model_type = match query.model_type.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(ModelType::parse(raw).ok_or_else(|| GatewayError::Validation {
            message: format!("Unknown model type `{raw}`."),
            param: Some("type".to_string()),
            code: None,
            status: 400,
        })?),
    };
    let filter = ModelFilter {
        model_type,
        premium: query.premium,
    };
    let data: Vec<Value> = state
        .processor
        .models()
        .list_all(filter)
        .into_iter()
        .map(|descriptor| descriptor.to_list_entry())
        .collect();
    Ok(Json(json!({ "object": "list", "data": data })))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": tollway_core::version(),
        "models": state.processor.models().len(),
    }))
}
