//! 请求调度器
//!
//! 请求处理流程：
//! 1. 校验：模型存在、端点类型匹配、高级模型权限、语音、工具剥离
//! 2. 估算额度 (Estimating)
//! 3. 检查余额 (Reserving)
//! 4. 选择凭证 (SelectingProvider)，选中后预扣额度
//! 5. 上游调用 (Dispatching)，失败时排除已尝试凭证重新选择
//! 6. 流式转发 (Streaming) 或 处理结果 (Completing)
//! 7. 结算 (Settling)

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tollway_core::config::DispatchConfig;
use tollway_core::estimator::{completion_cost, estimate, text_tokens};
use tollway_core::models::account::User;
use tollway_core::models::credential::ProviderCredential;
use tollway_core::models::openai::GatewayRequest;
use tollway_core::{GatewayError, GatewayResult, ModelDescriptor, ModelRegistry};
use tollway_credential::{CredentialPool, SelectionContext};
use tollway_providers::{ProviderRegistry, UpstreamError, UpstreamResponse};
use tollway_services::{CaptureGuard, Ledger};

use crate::context::{DispatchStage, RequestContext};
use crate::steps::retry::{AttemptError, Retrier, RetryConfig};
use crate::steps::stream::{metered_stream, SseStream, StreamMeter};

/// 调度结果
pub enum DispatchOutcome {
    Json {
        provider: String,
        body: Value,
        processing_ms: u64,
    },
    Binary {
        provider: String,
        content_type: String,
        body: Bytes,
        processing_ms: u64,
    },
    Stream {
        provider: String,
        stream: SseStream,
    },
}

impl DispatchOutcome {
    pub fn provider(&self) -> &str {
        match self {
            Self::Json { provider, .. }
            | Self::Binary { provider, .. }
            | Self::Stream { provider, .. } => provider,
        }
    }
}

/// 上游调用成功的一次尝试
struct Dispatched {
    credential: ProviderCredential,
    response: UpstreamResponse,
    elapsed_ms: u64,
}

/// 同一请求各次尝试共享的选择状态
struct AttemptState {
    preselected: Mutex<Option<ProviderCredential>>,
    tried: Mutex<Vec<String>>,
}

impl AttemptState {
    fn new(first: ProviderCredential) -> Self {
        Self {
            preselected: Mutex::new(Some(first)),
            tried: Mutex::new(Vec::new()),
        }
    }

    fn take_preselected(&self) -> Option<ProviderCredential> {
        self.preselected.lock().take()
    }

    fn mark_tried(&self, name: &str) {
        self.tried.lock().push(name.to_string());
    }

    /// 排除已尝试凭证后的选择上下文
    fn selection(&self, base: &SelectionContext) -> SelectionContext {
        let tried = self.tried.lock();
        tried
            .iter()
            .fold(base.clone(), |ctx, name| ctx.exclude_credential(name))
    }
}

/// 非流式对话输出文本
pub fn completion_text(body: &Value) -> String {
    body["choices"]
        .as_array()
        .map(|choices| {
            choices
                .iter()
                .filter_map(|choice| choice["message"]["content"].as_str())
                .collect()
        })
        .unwrap_or_default()
}

/// 统一的请求调度器
pub struct RequestProcessor {
    models: Arc<ModelRegistry>,
    providers: Arc<ProviderRegistry>,
    pool: Arc<CredentialPool>,
    ledger: Arc<Ledger>,
    retrier: Retrier,
    dispatch: DispatchConfig,
}

impl RequestProcessor {
    pub fn new(
        models: Arc<ModelRegistry>,
        providers: Arc<ProviderRegistry>,
        pool: Arc<CredentialPool>,
        ledger: Arc<Ledger>,
        dispatch: DispatchConfig,
    ) -> Self {
        let retrier = Retrier::new(RetryConfig {
            max_attempts: dispatch.max_attempts,
        });
        Self {
            models,
            providers,
            pool,
            ledger,
            retrier,
            dispatch,
        }
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn dispatch_config(&self) -> &DispatchConfig {
        &self.dispatch
    }

    /// 校验请求，必要时剥离模型不支持的工具定义
    pub fn validate(&self, user: &User, request: &mut GatewayRequest) -> GatewayResult<ModelDescriptor> {
        let descriptor = self.models.describe(request.model())?.clone();

        if descriptor.model_type != request.model_type() {
            return Err(GatewayError::Validation {
                message: format!(
                    "The model `{}` is not available on {}.",
                    descriptor.model_id,
                    request.model_type().endpoint()
                ),
                param: Some("model".to_string()),
                code: Some("model_type_mismatch".to_string()),
                status: 400,
            });
        }

        if descriptor.premium && !user.is_premium() {
            return Err(GatewayError::model_forbidden(&descriptor.model_id));
        }

        match request {
            GatewayRequest::Speech(speech)
                if !descriptor.voices.is_empty() && !descriptor.voices.contains(&speech.voice) =>
            {
                return Err(GatewayError::Validation {
                    message: format!(
                        "The voice `{}` is not supported. Supported voices: {}.",
                        speech.voice,
                        descriptor.voices.join(", ")
                    ),
                    param: Some("voice".to_string()),
                    code: Some("invalid_voice".to_string()),
                    status: 400,
                });
            }
            GatewayRequest::Chat(chat) => {
                if chat.messages.is_empty() {
                    return Err(GatewayError::Validation {
                        message: "`messages` must contain at least one message.".to_string(),
                        param: Some("messages".to_string()),
                        code: None,
                        status: 400,
                    });
                }
                if chat.stream && !descriptor.supports_streaming {
                    return Err(GatewayError::validation(format!(
                        "The model `{}` does not support streaming.",
                        descriptor.model_id
                    )));
                }
                if !descriptor.supports_tools && (chat.has_tools() || chat.tool_choice.is_some()) {
                    tracing::debug!(
                        "[ROUTE] 模型不支持工具调用，已移除 tools: model={}",
                        descriptor.model_id
                    );
                    chat.strip_tools();
                }
            }
            _ => {}
        }

        Ok(descriptor)
    }

    /// 处理一个已认证用户的请求
    pub async fn process(
        &self,
        user: &User,
        mut request: GatewayRequest,
    ) -> GatewayResult<DispatchOutcome> {
        let descriptor = self.validate(user, &mut request)?;
        let mut ctx = RequestContext::new(user, &descriptor.model_id);
        tracing::info!(
            "[ROUTE] request_id={} user={} model={} endpoint={} stream={}",
            ctx.request_id,
            ctx.user_id,
            ctx.model_id,
            descriptor.model_type,
            request.is_stream()
        );

        let estimated = estimate(&descriptor, &request);
        ctx.advance(DispatchStage::Reserving)?;
        let reservation = self.ledger.reserve(&user.api_key, estimated).await?;

        ctx.advance(DispatchStage::SelectingProvider)?;
        let selection = SelectionContext::new(&descriptor.model_id)
            .with_vision(request.requires_vision())
            .with_tools(request.requires_tools())
            .with_premium(user.is_premium());
        let first = match self.pool.select_best(&selection).await {
            Ok(credential) => credential,
            Err(err) => {
                ctx.fail();
                return Err(err);
            }
        };
        // 之后任何提前返回或 future 被丢弃，守卫都会退回预扣额度
        let capture = match self.ledger.capture_guarded(reservation).await {
            Ok(capture) => capture,
            Err(err) => {
                ctx.fail();
                return Err(err);
            }
        };

        ctx.advance(DispatchStage::Dispatching)?;
        let request_id = ctx.request_id.clone();
        let state = AttemptState::new(first);
        let (request_id, selection, state, upstream_request) =
            (request_id.as_str(), &selection, &state, &request);
        let result = self
            .retrier
            .execute(request_id, move |attempt| {
                self.attempt(request_id, attempt, selection, state, upstream_request)
            })
            .await;

        let dispatched = match result {
            Ok(dispatched) => dispatched,
            Err(err) => {
                ctx.fail();
                self.release(&ctx, capture).await;
                tracing::error!("[ROUTE] request_id={} 请求失败: {}", ctx.request_id, err);
                return Err(err);
            }
        };

        let provider = dispatched.credential.name.clone();
        ctx.credential = Some(provider.clone());

        match dispatched.response {
            UpstreamResponse::Stream(upstream) => {
                ctx.advance(DispatchStage::Streaming)?;
                // 流式请求以首包耗时作为延迟样本
                self.record_success(&ctx, &provider, dispatched.elapsed_ms, 0)
                    .await;
                // 输入额度已扣，输出在流中逐片计费
                capture.commit();
                let meter = StreamMeter {
                    ctx,
                    api_key: user.api_key.clone(),
                    credential: provider.clone(),
                    descriptor,
                    ledger: self.ledger.clone(),
                    pool: self.pool.clone(),
                    emitted_chars: 0,
                    charged: 0,
                };
                Ok(DispatchOutcome::Stream {
                    provider,
                    stream: metered_stream(upstream, meter),
                })
            }
            UpstreamResponse::Json(mut body) => {
                ctx.advance(DispatchStage::Completing)?;
                let output = completion_text(&body);
                let output_size = text_tokens(&output) as usize;
                self.record_success(&ctx, &provider, dispatched.elapsed_ms, output_size)
                    .await;
                if let Some(object) = body.as_object_mut() {
                    object.insert("provider_id".to_string(), Value::String(provider.clone()));
                }

                ctx.advance(DispatchStage::Settling)?;
                let actual = estimated + completion_cost(&descriptor, &output);
                self.settle(&ctx, capture, actual).await;
                ctx.advance(DispatchStage::Done)?;
                Ok(DispatchOutcome::Json {
                    provider,
                    body,
                    processing_ms: ctx.elapsed_ms(),
                })
            }
            UpstreamResponse::Binary { content_type, body } => {
                ctx.advance(DispatchStage::Completing)?;
                self.record_success(&ctx, &provider, dispatched.elapsed_ms, 0)
                    .await;
                ctx.advance(DispatchStage::Settling)?;
                self.settle(&ctx, capture, estimated).await;
                ctx.advance(DispatchStage::Done)?;
                Ok(DispatchOutcome::Binary {
                    provider,
                    content_type,
                    body,
                    processing_ms: ctx.elapsed_ms(),
                })
            }
        }
    }

    /// 单次尝试：取预选凭证或重新选择，然后调用上游
    async fn attempt(
        &self,
        request_id: &str,
        attempt: u32,
        selection: &SelectionContext,
        state: &AttemptState,
        request: &GatewayRequest,
    ) -> Result<Dispatched, AttemptError> {
        let credential = match state.take_preselected() {
            Some(credential) => credential,
            None => match self.pool.select_best(&state.selection(selection)).await {
                Ok(credential) => {
                    tracing::info!(
                        "[FAILOVER] request_id={} attempt={} 切换凭证: credential={}",
                        request_id,
                        attempt,
                        credential.name
                    );
                    credential
                }
                Err(GatewayError::NoProviderAvailable) => return Err(AttemptError::Exhausted),
                Err(err) => return Err(AttemptError::Abort(err)),
            },
        };
        state.mark_tried(&credential.name);

        let Some(provider) = self.providers.get(&credential.provider_name) else {
            tracing::error!(
                "[ROUTE] request_id={} 凭证引用了未注册的 Provider: credential={} provider={}",
                request_id,
                credential.name,
                credential.provider_name
            );
            return Err(AttemptError::Retry(GatewayError::internal(format!(
                "provider `{}` is not registered",
                credential.provider_name
            ))));
        };

        let mut upstream_request = request.clone();
        if let Some(model) = credential.model(&selection.model_id) {
            upstream_request.set_model(&model.api_name);
        }

        tracing::info!(
            "[ROUTE] request_id={} attempt={} credential={} provider={} upstream_model={}",
            request_id,
            attempt,
            credential.name,
            credential.provider_name,
            upstream_request.model()
        );

        let started = Instant::now();
        let timeout_ms = self.dispatch.timeout_ms;
        let result = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            provider.dispatch(&credential, &upstream_request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::timeout(timeout_ms)),
        };

        match result {
            Ok(response) => Ok(Dispatched {
                credential,
                response,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
            Err(err) => {
                self.handle_upstream_failure(request_id, &credential, &selection.model_id, &err)
                    .await;
                Err(AttemptError::Retry(GatewayError::upstream(
                    &credential.name,
                    err.status,
                    err.message,
                )))
            }
        }
    }

    /// 记录失败，命中配置的状态码时下线凭证
    async fn handle_upstream_failure(
        &self,
        request_id: &str,
        credential: &ProviderCredential,
        model_id: &str,
        err: &UpstreamError,
    ) {
        tracing::warn!(
            "[ROUTE] request_id={} credential={} 上游失败: status={:?} message={}",
            request_id,
            credential.name,
            err.status,
            err.message
        );
        if let Err(e) = self.pool.record_failure(&credential.name, model_id).await {
            tracing::error!("[POOL] request_id={} 记录失败统计出错: {}", request_id, e);
        }
        let disable = err
            .status
            .is_some_and(|status| self.dispatch.disable_on_status.contains(&status));
        if disable {
            if let Err(e) = self.pool.disable(&credential.name).await {
                tracing::error!("[POOL] request_id={} 下线凭证出错: {}", request_id, e);
            }
        }
    }

    async fn record_success(
        &self,
        ctx: &RequestContext,
        credential: &str,
        elapsed_ms: u64,
        output_size: usize,
    ) {
        if let Err(e) = self
            .pool
            .record_success(credential, &ctx.model_id, elapsed_ms, output_size)
            .await
        {
            tracing::error!("[POOL] request_id={} 记录成功统计出错: {}", ctx.request_id, e);
        }
    }

    async fn settle(&self, ctx: &RequestContext, capture: CaptureGuard, actual: u64) {
        let estimated = capture.amount();
        if let Err(e) = capture.settle(actual).await {
            tracing::error!(
                "[LEDGER] request_id={} 结算失败: estimated={} actual={} error={}",
                ctx.request_id,
                estimated,
                actual,
                e
            );
        }
    }

    async fn release(&self, ctx: &RequestContext, capture: CaptureGuard) {
        let amount = capture.amount();
        if let Err(e) = capture.release().await {
            tracing::error!(
                "[LEDGER] request_id={} 退回预扣额度失败: amount={} error={}",
                ctx.request_id,
                amount,
                e
            );
        }
    }
}
