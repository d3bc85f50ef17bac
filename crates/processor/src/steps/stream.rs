//! 流式转发与计费
//!
//! 上游 SSE 逐行转发，每个分片注入 `provider_id` 并在下发前扣减输出额度。
//! 客户端断开时流被丢弃，已下发的分片已经计费，未下发的不计费。
//! 结尾总是补一个 `data: [DONE]`。

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tollway_core::estimator::output_cost;
use tollway_core::{GatewayError, ModelDescriptor};
use tollway_credential::CredentialPool;
use tollway_providers::sse::{is_done, SseLineBuffer};
use tollway_providers::{ByteStream, UpstreamError};
use tollway_services::Ledger;

use crate::context::{DispatchStage, RequestContext};

/// 下发给客户端的 SSE 字节流
pub type SseStream = Pin<Box<dyn Stream<Item = Result<Bytes, Infallible>> + Send>>;

pub const DONE_EVENT: &[u8] = b"data: [DONE]\n\n";

/// 流式计费所需的上下文
pub struct StreamMeter {
    pub ctx: RequestContext,
    pub api_key: String,
    pub credential: String,
    pub descriptor: ModelDescriptor,
    pub ledger: Arc<Ledger>,
    pub pool: Arc<CredentialPool>,
    /// 已下发的输出字符数
    pub emitted_chars: u64,
    /// 已计费的输出额度
    pub charged: u64,
}

impl StreamMeter {
    /// 注入 provider_id，返回本分片应补扣的额度
    ///
    /// 按累计输出计算总额再减去已扣部分，取整只发生在总额上。
    fn annotate(&mut self, payload: &str) -> (Bytes, u64) {
        let Ok(mut value) = serde_json::from_str::<Value>(payload) else {
            return (Bytes::from(format!("data: {payload}\n\n")), 0);
        };
        self.emitted_chars += delta_text(&value).chars().count() as u64;
        let cost = output_cost(&self.descriptor, self.emitted_chars).saturating_sub(self.charged);
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "provider_id".to_string(),
                Value::String(self.credential.clone()),
            );
        }
        (Bytes::from(format!("data: {value}\n\n")), cost)
    }

    async fn charge(&mut self, cost: u64) {
        if cost == 0 {
            return;
        }
        match self.ledger.debit(&self.api_key, cost).await {
            Ok(balance) => {
                self.charged += cost;
                tracing::trace!(
                    "[LEDGER] request_id={} 流式扣减: amount={} balance={}",
                    self.ctx.request_id,
                    cost,
                    balance
                );
            }
            Err(e) => {
                tracing::error!(
                    "[LEDGER] request_id={} 流式扣减失败: amount={} error={}",
                    self.ctx.request_id,
                    cost,
                    e
                );
            }
        }
    }

    /// 输入额度已在发往上游前扣除，这里只推进状态
    fn finish(&mut self) {
        let settled = self
            .ctx
            .advance(DispatchStage::Settling)
            .and_then(|_| self.ctx.advance(DispatchStage::Done));
        if settled.is_ok() {
            tracing::info!(
                "[LEDGER] request_id={} credential={} 流式结束: output_charged={} elapsed_ms={}",
                self.ctx.request_id,
                self.credential,
                self.charged,
                self.ctx.elapsed_ms()
            );
        }
    }

    async fn fail(&mut self, err: &UpstreamError) {
        self.ctx.fail();
        tracing::warn!(
            "[FAILOVER] request_id={} credential={} 流式中断: {}",
            self.ctx.request_id,
            self.credential,
            err
        );
        if let Err(e) = self
            .pool
            .record_failure(&self.credential, &self.descriptor.model_id)
            .await
        {
            tracing::error!("[POOL] request_id={} 记录失败统计出错: {}", self.ctx.request_id, e);
        }
    }
}

/// 流式分片中 `choices[].delta.content` 的拼接
pub fn delta_text(value: &Value) -> String {
    value["choices"]
        .as_array()
        .map(|choices| {
            choices
                .iter()
                .filter_map(|choice| choice["delta"]["content"].as_str())
                .collect()
        })
        .unwrap_or_default()
}

fn error_event(credential: &str, err: &UpstreamError) -> Bytes {
    let envelope = GatewayError::upstream(credential, err.status, err.message.clone()).to_envelope();
    let body = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("data: {body}\n\n"))
}

/// 包装上游字节流
pub fn metered_stream(upstream: ByteStream, mut meter: StreamMeter) -> SseStream {
    let stream = async_stream::stream! {
        let mut upstream = upstream;
        let mut lines = SseLineBuffer::new();

        loop {
            let (payloads, end) = match upstream.next().await {
                Some(Ok(chunk)) => (lines.push(&chunk), None),
                Some(Err(err)) => (Vec::new(), Some(Err(err))),
                None => (lines.finish().into_iter().collect(), Some(Ok(()))),
            };

            for payload in payloads {
                if is_done(&payload) {
                    continue;
                }
                let (event, cost) = meter.annotate(&payload);
                meter.charge(cost).await;
                yield Ok(event);
            }

            match end {
                None => continue,
                Some(Ok(())) => {
                    meter.finish();
                    break;
                }
                Some(Err(err)) => {
                    meter.fail(&err).await;
                    yield Ok(error_event(&meter.credential, &err));
                    break;
                }
            }
        }

        yield Ok(Bytes::from_static(DONE_EVENT));
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_text_joins_choices() {
        let value = serde_json::json!({
            "choices": [
                {"delta": {"content": "ab"}},
                {"delta": {"role": "assistant"}},
                {"delta": {"content": "cd"}}
            ]
        });
        assert_eq!(delta_text(&value), "abcd");
        assert_eq!(delta_text(&serde_json::json!({"usage": {}})), "");
    }

    #[test]
    fn test_error_event_is_opaque() {
        let event = error_event("alpha", &UpstreamError::status(500, "secret detail"));
        let text = String::from_utf8(event.to_vec()).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.contains("invalid_response_error"));
        assert!(!text.contains("secret detail"));
    }
}
