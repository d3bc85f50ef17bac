//! Tollway 网关入口
//!
//! 启动顺序：配置 → 日志 → 数据库 → 凭证 → Provider 与模型目录 → 调度器 → 后台任务 → HTTP 服务

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;
use tollway_core::config::{config_path, Config};
use tollway_core::database::init_database;
use tollway_core::logger::init_logging;
use tollway_core::{GatewayStore, SqliteStore};
use tollway_credential::CredentialPool;
use tollway_processor::RequestProcessor;
use tollway_providers::ProviderRegistry;
use tollway_server::{run_server, AppState, RateLimiter};
use tollway_services::{spawn_refill_task, Ledger};

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = Config::load_with_env(&path)
        .with_context(|| format!("加载配置失败: {}", path.display()))?;
    init_logging(&config.logging).map_err(|e| anyhow!(e))?;
    tracing::info!(
        "[MAIN] Tollway v{} 启动，配置文件: {}",
        tollway_core::version(),
        path.display()
    );

    let db = init_database(&config.database.path)
        .map_err(|e| anyhow!("初始化数据库失败 {}: {e}", config.database.path))?;
    let store = Arc::new(SqliteStore::new(db));
    let pool = Arc::new(CredentialPool::with_kind(
        store.clone(),
        config.dispatch.strategy,
    ));

    for credential in &config.credentials {
        pool.upsert(credential)
            .await
            .map_err(|e| anyhow!("写入凭证 {} 失败: {e}", credential.name))?;
    }
    tracing::info!(
        "[MAIN] 已加载 {} 个凭证，策略: {}",
        config.credentials.len(),
        pool.strategy_id()
    );

    let client = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .context("创建 HTTP 客户端失败")?;
    let providers = ProviderRegistry::builtin(client);
    let models = providers.model_registry();
    tracing::info!(
        "[MAIN] 已注册 Provider: {:?}，模型数: {}",
        providers.names(),
        models.len()
    );

    let ledger = Arc::new(Ledger::new(store.clone(), config.billing.clone()));
    let processor = Arc::new(RequestProcessor::new(
        Arc::new(models),
        Arc::new(providers),
        pool,
        ledger.clone(),
        config.dispatch.clone(),
    ));

    let cancel_token = CancellationToken::new();
    let refill_handle = spawn_refill_task(
        ledger,
        Duration::from_secs(config.billing.refill_check_interval_secs.max(1)),
        cancel_token.clone(),
    );

    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[MAIN] 监听退出信号失败: {}", e);
            return;
        }
        tracing::info!("[MAIN] 收到退出信号，开始关闭");
        shutdown.cancel();
    });

    let state = AppState::new(
        processor,
        store as Arc<dyn GatewayStore>,
        Arc::new(RateLimiter::new(config.rate_limit.clone())),
        config.server.clone(),
    );
    let served = run_server(state, cancel_token.clone()).await;

    cancel_token.cancel();
    if let Err(e) = refill_handle.await {
        tracing::warn!("[MAIN] 额度补充任务异常退出: {}", e);
    }
    served.context("HTTP 服务异常退出")
}
