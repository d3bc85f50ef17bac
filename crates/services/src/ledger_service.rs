//! 账户额度服务
//!
//! 请求流程中的额度变化：
//! `reserve`（只检查） -> `capture`（选中凭证后、发往上游前扣除预估额度）
//! -> `settle`（按实际用量多退少补）或 `release`（全部尝试失败时退回）。
//! 流式输出通过 `debit` 按分片增量扣减。

use std::sync::Arc;

use serde::Serialize;
use tollway_core::config::BillingConfig;
use tollway_core::models::account::{User, UserUpdate, FREE_TIER};
use tollway_core::store::RefillRule;
use tollway_core::{GatewayError, GatewayResult, GatewayStore};

fn to_credits(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

/// 额度预留
///
/// `reserve` 不修改余额，`capture` 后才真正扣除。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub api_key: String,
    pub amount: u64,
    captured: bool,
}

impl Reservation {
    pub fn is_captured(&self) -> bool {
        self.captured
    }

    fn captured_amount(&self) -> i64 {
        if self.captured {
            to_credits(self.amount)
        } else {
            0
        }
    }
}

/// 一次批量补充的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefillSummary {
    pub checked: usize,
    pub refilled: usize,
    pub downgraded: usize,
}

pub struct Ledger {
    store: Arc<dyn GatewayStore>,
    billing: BillingConfig,
}

impl Ledger {
    pub fn new(store: Arc<dyn GatewayStore>, billing: BillingConfig) -> Self {
        Self { store, billing }
    }

    pub fn billing(&self) -> &BillingConfig {
        &self.billing
    }

    async fn adjust(&self, api_key: &str, delta: i64) -> GatewayResult<i64> {
        self.store
            .adjust_balance(api_key, delta)
            .await?
            .ok_or_else(GatewayError::invalid_key)
    }

    /// 检查余额是否足够，不修改余额
    pub async fn reserve(&self, api_key: &str, estimated: u64) -> GatewayResult<Reservation> {
        let user = self
            .store
            .get_user(api_key)
            .await?
            .ok_or_else(GatewayError::invalid_key)?;

        if to_credits(estimated) > user.balance {
            tracing::info!(
                "[LEDGER] 额度不足: user={} balance={} required={}",
                user.id,
                user.balance,
                estimated
            );
            return Err(GatewayError::InsufficientCredits {
                available: user.balance,
                required: estimated,
            });
        }

        Ok(Reservation {
            api_key: api_key.to_string(),
            amount: estimated,
            captured: false,
        })
    }

    /// 扣除预留额度，重复调用无副作用
    pub async fn capture(&self, reservation: &mut Reservation) -> GatewayResult<i64> {
        if reservation.captured {
            return self.balance(&reservation.api_key).await;
        }
        let balance = self
            .adjust(&reservation.api_key, -to_credits(reservation.amount))
            .await?;
        reservation.captured = true;
        tracing::debug!(
            "[LEDGER] 预扣额度: amount={} balance={}",
            reservation.amount,
            balance
        );
        Ok(balance)
    }

    /// 按实际用量结算：多扣的退回，少扣的补扣
    pub async fn settle(&self, reservation: &Reservation, actual: u64) -> GatewayResult<i64> {
        let delta = to_credits(actual) - reservation.captured_amount();
        if delta == 0 {
            return self.balance(&reservation.api_key).await;
        }
        let balance = self.adjust(&reservation.api_key, -delta).await?;
        tracing::debug!(
            "[LEDGER] 结算: estimated={} actual={} delta={} balance={}",
            reservation.amount,
            actual,
            delta,
            balance
        );
        Ok(balance)
    }

    /// 退回已扣除的预留额度
    pub async fn release(&self, reservation: &mut Reservation) -> GatewayResult<()> {
        if !reservation.captured {
            return Ok(());
        }
        self.adjust(&reservation.api_key, to_credits(reservation.amount))
            .await?;
        reservation.captured = false;
        tracing::debug!("[LEDGER] 退回预扣额度: amount={}", reservation.amount);
        Ok(())
    }

    /// 扣除预留额度并返回守卫，守卫未结算就被丢弃时自动退回
    pub async fn capture_guarded(
        self: &Arc<Self>,
        mut reservation: Reservation,
    ) -> GatewayResult<CaptureGuard> {
        self.capture(&mut reservation).await?;
        Ok(CaptureGuard {
            ledger: self.clone(),
            reservation: Some(reservation),
        })
    }

    /// 增量扣减（流式分片计费）
    pub async fn debit(&self, api_key: &str, amount: u64) -> GatewayResult<i64> {
        if amount == 0 {
            return self.balance(api_key).await;
        }
        self.adjust(api_key, -to_credits(amount)).await
    }

    pub async fn balance(&self, api_key: &str) -> GatewayResult<i64> {
        self.store
            .get_user(api_key)
            .await?
            .map(|u| u.balance)
            .ok_or_else(GatewayError::invalid_key)
    }

    /// 到期且余额低于阈值时补充额度，返回补充后的余额
    pub async fn refill_if_due(&self, user: &User, now: i64) -> GatewayResult<Option<i64>> {
        let rule = RefillRule {
            amount: self.billing.refill_amount(user.tier),
            now,
            interval: self.billing.refill_interval_secs,
            threshold: self.billing.refill_threshold,
        };
        let refilled = self.store.apply_refill(&user.api_key, rule).await?;
        if let Some(balance) = refilled {
            tracing::info!(
                "[LEDGER] 补充额度: user={} tier={} amount={} balance={}",
                user.id,
                user.tier,
                rule.amount,
                balance
            );
        }
        Ok(refilled)
    }

    /// 高级套餐过期后降为免费等级
    pub async fn enforce_premium_expiry(&self, user: &mut User, now: i64) -> GatewayResult<bool> {
        if !user.premium_expired(now) {
            return Ok(false);
        }
        let update = UserUpdate {
            tier: Some(FREE_TIER),
            premium_expiry: Some(None),
            ..Default::default()
        };
        self.store.update_user(&user.api_key, &update).await?;
        tracing::info!("[LEDGER] 高级套餐已过期: user={} tier={}", user.id, user.tier);
        user.tier = FREE_TIER;
        user.premium_expiry = None;
        Ok(true)
    }

    /// 扫描所有账户，处理过期降级与额度补充
    pub async fn refill_all(&self, now: i64) -> GatewayResult<RefillSummary> {
        let mut summary = RefillSummary::default();
        for mut user in self.store.list_users().await? {
            summary.checked += 1;
            if user.banned {
                continue;
            }
            if self.enforce_premium_expiry(&mut user, now).await? {
                summary.downgraded += 1;
            }
            if self.refill_if_due(&user, now).await?.is_some() {
                summary.refilled += 1;
            }
        }
        Ok(summary)
    }
}

/// 已扣除的预留额度
///
/// 必须以 `settle`、`release` 或 `commit` 收尾；请求被取消导致守卫直接丢弃时，
/// 在后台任务中退回预扣额度。
pub struct CaptureGuard {
    ledger: Arc<Ledger>,
    reservation: Option<Reservation>,
}

impl CaptureGuard {
    pub fn amount(&self) -> u64 {
        self.reservation.as_ref().map_or(0, |r| r.amount)
    }

    /// 按实际用量结算
    pub async fn settle(mut self, actual: u64) -> GatewayResult<i64> {
        let Some(reservation) = self.reservation.as_ref() else {
            return Err(GatewayError::internal("reservation already finalized"));
        };
        let result = self.ledger.settle(reservation, actual).await;
        self.reservation = None;
        result
    }

    /// 退回预扣额度
    pub async fn release(mut self) -> GatewayResult<()> {
        let Some(reservation) = self.reservation.as_mut() else {
            return Ok(());
        };
        let result = self.ledger.release(reservation).await;
        self.reservation = None;
        result
    }

    /// 保留已扣额度，不再结算
    pub fn commit(mut self) {
        self.reservation = None;
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let Some(mut reservation) = self.reservation.take() else {
            return;
        };
        if !reservation.is_captured() {
            return;
        }
        tracing::warn!(
            "[LEDGER] 请求未完成即被取消，退回预扣额度: amount={}",
            reservation.amount
        );
        let ledger = self.ledger.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = ledger.release(&mut reservation).await {
                        tracing::error!(
                            "[LEDGER] 退回预扣额度失败: amount={} error={}",
                            reservation.amount,
                            e
                        );
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    "[LEDGER] 没有运行时，无法退回预扣额度: amount={}",
                    reservation.amount
                );
            }
        }
    }
}
