//! 额度补充后台任务
//!
//! 固定间隔扫描所有账户，直到取消。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ledger_service::Ledger;

/// 启动补充任务，首轮立即执行
pub fn spawn_refill_task(
    ledger: Arc<Ledger>,
    every: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!("[Refill] 额度补充任务已启动，间隔 {} 秒", every.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match ledger.refill_all(tollway_core::unix_now()).await {
                        Ok(summary) if summary.refilled > 0 || summary.downgraded > 0 => {
                            tracing::info!(
                                "[Refill] 本轮完成: checked={} refilled={} downgraded={}",
                                summary.checked,
                                summary.refilled,
                                summary.downgraded
                            );
                        }
                        Ok(summary) => {
                            tracing::debug!("[Refill] 本轮无需补充: checked={}", summary.checked);
                        }
                        Err(e) => {
                            tracing::error!("[Refill] 补充额度失败: {}", e);
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    tracing::info!("[Refill] 额度补充任务已停止");
                    break;
                }
            }
        }
    })
}
