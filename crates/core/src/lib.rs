//! 核心类型和工具模块
//!
//! 包含 models, config, database, store, estimator, logger 等基础功能

pub mod config;
pub mod database;
pub mod errors;
pub mod estimator;
pub mod logger;
pub mod models;
pub mod store;

pub use errors::{GatewayError, GatewayResult};
pub use models::model_registry::{ModelDescriptor, ModelFilter, ModelRegistry, ModelType, Pricing};
pub use store::{GatewayStore, SqliteStore, StoreError, StoreResult};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 当前 Unix 时间戳（秒）
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// 当前 Unix 时间戳（秒，带小数）
pub fn unix_now_f64() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
