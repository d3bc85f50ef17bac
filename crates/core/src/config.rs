//! 配置模块
//!
//! YAML 配置文件 + 环境变量覆盖。配置文件不存在时使用默认值。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::credential::ProviderCredential;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("解析配置文件失败: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("配置无效: {0}")]
    Invalid(String),
}

/// 主配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub rate_limit: RateLimitConfig,
    pub billing: BillingConfig,
    pub dispatch: DispatchConfig,
    /// 启动时写入存储的上游凭证
    pub credentials: Vec<ProviderCredential>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 管理接口密钥，为空时禁用管理接口
    pub admin_key: String,
    /// 读取客户端真实 IP 的请求头
    pub ip_header: String,
    /// 免费用户是否绑定首次使用的 IP
    pub ip_binding: bool,
    /// 请求体大小上限（字节）
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            admin_key: String::new(),
            ip_header: "CF-Connecting-IP".to_string(),
            ip_binding: true,
            body_limit: 25 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite 路径，`:memory:` 表示内存数据库
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tollway")
            .join("tollway.db");
        Self {
            path: path.to_string_lossy().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter 语法，如 `info,tollway=debug`
    pub level: String,
    /// 输出 JSON 格式
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// 每秒请求数上限（令牌桶）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub free_per_second: u32,
    pub premium_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            free_per_second: 3,
            premium_per_second: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for_tier(&self, tier: u8) -> u32 {
        if tier > 0 {
            self.premium_per_second
        } else {
            self.free_per_second
        }
    }
}

/// 额度补充策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// 两次补充的最小间隔（秒）
    pub refill_interval_secs: i64,
    /// 余额低于该值才补充
    pub refill_threshold: i64,
    /// 免费用户补充额度
    pub free_refill: i64,
    /// 第 N 级高级用户补充额度（下标 N-1）
    pub premium_refills: Vec<i64>,
    /// 后台补充任务的轮询间隔（秒）
    pub refill_check_interval_secs: u64,
    /// 新签发密钥的初始额度
    pub initial_balance: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            refill_interval_secs: 86_400,
            refill_threshold: 5_000,
            free_refill: 22_500,
            premium_refills: vec![50_000, 100_000, 200_000],
            refill_check_interval_secs: 300,
            initial_balance: 22_500,
        }
    }
}

impl BillingConfig {
    /// 指定等级的补充额度，超出配置范围时取最后一档
    pub fn refill_amount(&self, tier: u8) -> i64 {
        if tier == 0 {
            return self.free_refill;
        }
        let index = usize::from(tier) - 1;
        self.premium_refills
            .get(index)
            .or_else(|| self.premium_refills.last())
            .copied()
            .unwrap_or(self.free_refill)
    }
}

/// 凭证选择策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategyKind {
    #[default]
    HealthRanked,
    RoundRobin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 单个请求最多尝试次数（含首次）
    pub max_attempts: u32,
    /// 单次上游调用超时（毫秒）
    pub timeout_ms: u64,
    pub strategy: SelectionStrategyKind,
    /// 触发凭证下线的上游状态码
    pub disable_on_status: Vec<u16>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_ms: 100_000,
            strategy: SelectionStrategyKind::HealthRanked,
            disable_on_status: vec![401, 403, 429],
        }
    }
}

/// 默认配置文件路径
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TOLLWAY_CONFIG") {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tollway")
        .join("config.yaml")
}

impl Config {
    /// 解析 YAML 文本
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载，文件不存在时返回默认配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("[CONFIG] 配置文件不存在，使用默认配置: {}", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// 加载配置并应用环境变量覆盖
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// 应用环境变量覆盖
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("TOLLWAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TOLLWAY_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("TOLLWAY_PORT 不是有效端口: {port}")))?;
        }
        if let Some(key) = lookup("TOLLWAY_ADMIN_KEY") {
            self.server.admin_key = key;
        }
        if let Some(path) = lookup("TOLLWAY_DB_PATH") {
            self.database.path = path;
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.max_attempts == 0 {
            return Err(ConfigError::Invalid("dispatch.max_attempts 必须大于 0".into()));
        }
        if self.rate_limit.free_per_second == 0 || self.rate_limit.premium_per_second == 0 {
            return Err(ConfigError::Invalid("rate_limit 必须大于 0".into()));
        }
        let mut names = std::collections::HashSet::new();
        for credential in &self.credentials {
            if !names.insert(credential.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "凭证名称重复: {}",
                    credential.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.dispatch.disable_on_status, vec![401, 403, 429]);
        assert_eq!(config.rate_limit.limit_for_tier(0), 3);
        assert_eq!(config.rate_limit.limit_for_tier(2), 10);
        assert_eq!(config.billing.refill_threshold, 5_000);
        assert_eq!(config.billing.refill_check_interval_secs, 300);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            r#"
server:
  port: 9000
dispatch:
  strategy: round_robin
credentials:
  - name: main
    api_key: sk-a
    base_url: https://api.openai.com/v1
    models:
      - api_name: gpt-4o
        model_id: gpt-4o
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.dispatch.strategy, SelectionStrategyKind::RoundRobin);
        assert_eq!(config.dispatch.timeout_ms, 100_000);
        assert_eq!(config.credentials.len(), 1);
    }

    #[test]
    fn test_duplicate_credentials_rejected() {
        let yaml = r#"
credentials:
  - { name: a, api_key: k, base_url: u }
  - { name: a, api_key: k2, base_url: u2 }
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_env_override() {
        let mut config = Config::default();
        config
            .apply_env(|key| match key {
                "TOLLWAY_PORT" => Some("7000".to_string()),
                "TOLLWAY_ADMIN_KEY" => Some("admin".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.admin_key, "admin");

        let bad = config.apply_env(|key| (key == "TOLLWAY_PORT").then(|| "abc".to_string()));
        assert!(bad.is_err());
    }

    #[test]
    fn test_refill_amount_by_tier() {
        let billing = BillingConfig::default();
        assert_eq!(billing.refill_amount(0), 22_500);
        assert_eq!(billing.refill_amount(1), 50_000);
        assert_eq!(billing.refill_amount(3), 200_000);
        assert_eq!(billing.refill_amount(9), 200_000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = Config::default();
        config.server.port = 8123;
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);

        let missing = Config::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(missing, Config::default());
    }
}
