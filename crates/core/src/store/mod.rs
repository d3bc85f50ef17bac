//! 持久化存储抽象
//!
//! 网关所有可变共享状态（余额、凭证统计）都经由该 trait 访问，
//! 每个修改操作都必须在存储侧原子完成。

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::errors::GatewayError;
use crate::models::account::{User, UserUpdate};
use crate::models::credential::{CredentialUpdate, ProviderCredential};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("数据库错误: {0}")]
    Database(String),
    #[error("数据库锁已损坏")]
    LockPoisoned,
}

impl From<String> for StoreError {
    fn from(message: String) -> Self {
        Self::Database(message)
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 补充额度的条件参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefillRule {
    pub amount: i64,
    pub now: i64,
    pub interval: i64,
    pub threshold: i64,
}

#[async_trait]
pub trait GatewayStore: Send + Sync {
    // 账户
    async fn get_user(&self, api_key: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn update_user(&self, api_key: &str, update: &UserUpdate) -> StoreResult<bool>;
    /// 原子增减余额，返回新余额
    async fn adjust_balance(&self, api_key: &str, delta: i64) -> StoreResult<Option<i64>>;
    /// 条件补充额度，返回补充后的余额
    async fn apply_refill(&self, api_key: &str, rule: RefillRule) -> StoreResult<Option<i64>>;

    // 凭证
    async fn find_providers(&self, model_id: &str) -> StoreResult<Vec<ProviderCredential>>;
    async fn get_provider(&self, name: &str) -> StoreResult<Option<ProviderCredential>>;
    async fn list_providers(&self) -> StoreResult<Vec<ProviderCredential>>;
    async fn upsert_provider(&self, credential: &ProviderCredential) -> StoreResult<()>;
    async fn update_provider(&self, name: &str, update: &CredentialUpdate) -> StoreResult<bool>;
    async fn record_model_success(
        &self,
        name: &str,
        model_id: &str,
        latency_sample: f64,
    ) -> StoreResult<bool>;
    async fn record_model_failure(&self, name: &str, model_id: &str, failed_at: f64)
        -> StoreResult<bool>;
    async fn reset_model_stats(&self, name: &str) -> StoreResult<usize>;
}
