use async_trait::async_trait;
use rusqlite::Connection;

use super::{GatewayStore, RefillRule, StoreError, StoreResult};
use crate::database::dao::{ProviderDao, UserDao};
use crate::database::DbConnection;
use crate::models::account::{User, UserUpdate};
use crate::models::credential::{CredentialUpdate, ProviderCredential};

/// 基于 SQLite 的存储实现
#[derive(Clone)]
pub struct SqliteStore {
    db: DbConnection,
}

impl SqliteStore {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    /// 内存数据库，主要用于测试
    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self::new(crate::database::init_database(":memory:")?))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, String>) -> StoreResult<T> {
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn).map_err(StoreError::Database)
    }
}

#[async_trait]
impl GatewayStore for SqliteStore {
    async fn get_user(&self, api_key: &str) -> StoreResult<Option<User>> {
        self.with_conn(|conn| UserDao::get_by_key(conn, api_key))
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.with_conn(UserDao::list)
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.with_conn(|conn| UserDao::insert(conn, user))
    }

    async fn update_user(&self, api_key: &str, update: &UserUpdate) -> StoreResult<bool> {
        self.with_conn(|conn| UserDao::update(conn, api_key, update))
    }

    async fn adjust_balance(&self, api_key: &str, delta: i64) -> StoreResult<Option<i64>> {
        self.with_conn(|conn| UserDao::adjust_balance(conn, api_key, delta))
    }

    async fn apply_refill(&self, api_key: &str, rule: RefillRule) -> StoreResult<Option<i64>> {
        self.with_conn(|conn| {
            UserDao::apply_refill(
                conn,
                api_key,
                rule.amount,
                rule.now,
                rule.interval,
                rule.threshold,
            )
        })
    }

    async fn find_providers(&self, model_id: &str) -> StoreResult<Vec<ProviderCredential>> {
        self.with_conn(|conn| ProviderDao::find_by_model(conn, model_id))
    }

    async fn get_provider(&self, name: &str) -> StoreResult<Option<ProviderCredential>> {
        self.with_conn(|conn| ProviderDao::get(conn, name))
    }

    async fn list_providers(&self) -> StoreResult<Vec<ProviderCredential>> {
        self.with_conn(ProviderDao::list)
    }

    async fn upsert_provider(&self, credential: &ProviderCredential) -> StoreResult<()> {
        let now = crate::unix_now();
        self.with_conn(|conn| ProviderDao::upsert(conn, credential, now))
    }

    async fn update_provider(&self, name: &str, update: &CredentialUpdate) -> StoreResult<bool> {
        self.with_conn(|conn| ProviderDao::update(conn, name, update))
    }

    async fn record_model_success(
        &self,
        name: &str,
        model_id: &str,
        latency_sample: f64,
    ) -> StoreResult<bool> {
        self.with_conn(|conn| ProviderDao::record_success(conn, name, model_id, latency_sample))
    }

    async fn record_model_failure(
        &self,
        name: &str,
        model_id: &str,
        failed_at: f64,
    ) -> StoreResult<bool> {
        self.with_conn(|conn| ProviderDao::record_failure(conn, name, model_id, failed_at))
    }

    async fn reset_model_stats(&self, name: &str) -> StoreResult<usize> {
        self.with_conn(|conn| ProviderDao::reset_stats(conn, name))
    }
}
