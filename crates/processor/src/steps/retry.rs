//! 重试与故障转移
//!
//! 每次尝试由调用方重新选择凭证，重试器只负责次数与错误归并。

use std::future::Future;

use tollway_core::GatewayError;

/// 单次尝试失败的处理方式
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptError {
    /// 换凭证再试
    Retry(GatewayError),
    /// 立即终止
    Abort(GatewayError),
    /// 没有剩余候选凭证
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// 最多尝试次数（含首次）
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// 执行带重试的操作，`operation` 接收从 1 开始的尝试序号
    ///
    /// 候选耗尽时返回最后一次上游错误；一次都没发出时返回 `NoProviderAvailable`。
    pub async fn execute<T, F, Fut>(&self, request_id: &str, mut operation: F) -> Result<T, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(
                            "[RETRY] request_id={} 第 {} 次尝试成功",
                            request_id,
                            attempt
                        );
                    }
                    return Ok(value);
                }
                Err(AttemptError::Retry(err)) => {
                    tracing::warn!(
                        "[RETRY] request_id={} attempt={}/{} error={}",
                        request_id,
                        attempt,
                        max_attempts,
                        err
                    );
                    last_error = Some(err);
                }
                Err(AttemptError::Abort(err)) => return Err(err),
                Err(AttemptError::Exhausted) => {
                    tracing::warn!(
                        "[FAILOVER] request_id={} attempt={}/{} 没有剩余可用凭证",
                        request_id,
                        attempt,
                        max_attempts
                    );
                    break;
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NoProviderAvailable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn upstream(status: u16) -> GatewayError {
        GatewayError::upstream("alpha", Some(status), "boom")
    }

    #[tokio::test]
    async fn test_succeeds_after_retry() {
        let retrier = Retrier::default();
        let calls = AtomicU32::new(0);
        let result = retrier
            .execute("req", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(AttemptError::Retry(upstream(500)))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stops_at_max_attempts() {
        let retrier = Retrier::new(RetryConfig { max_attempts: 3 });
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retrier
            .execute("req", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(AttemptError::Retry(upstream(500 + attempt as u16))) }
            })
            .await;
        assert_eq!(result, Err(upstream(503)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_surfaces_last_error() {
        let retrier = Retrier::default();
        let result: Result<(), _> = retrier
            .execute("req", |attempt| async move {
                if attempt == 1 {
                    Err(AttemptError::Retry(upstream(429)))
                } else {
                    Err(AttemptError::Exhausted)
                }
            })
            .await;
        assert_eq!(result, Err(upstream(429)));

        let result: Result<(), _> = retrier
            .execute("req", |_| async { Err(AttemptError::Exhausted) })
            .await;
        assert_eq!(result, Err(GatewayError::NoProviderAvailable));
    }

    #[tokio::test]
    async fn test_abort_is_not_retried() {
        let retrier = Retrier::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retrier
            .execute("req", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AttemptError::Abort(GatewayError::internal("db"))) }
            })
            .await;
        assert_eq!(result, Err(GatewayError::internal("db")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
