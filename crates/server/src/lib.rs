//! 网关 HTTP 服务
//!
//! ## 模块结构
//! - `state`: 共享状态
//! - `middleware`: 认证、限流、管理守卫
//! - `rate_limit`: 按密钥的令牌桶
//! - `handlers`: OpenAI 兼容端点
//! - `admin`: 管理接口
//! - `response`: 错误信封与调度结果转换

pub mod admin;
pub mod handlers;
pub mod middleware;
pub mod rate_limit;
pub mod response;
pub mod state;

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tollway_core::config::DispatchConfig;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};

pub use rate_limit::{RateDecision, RateLimiter};
pub use state::AppState;

/// 全部尝试用尽后留给结算与响应的余量
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);
const BUCKET_IDLE: Duration = Duration::from_secs(300);

/// 等待响应头的总时长上限，覆盖全部上游尝试；流式响应体不受限
pub fn request_timeout(dispatch: &DispatchConfig) -> Duration {
    let attempts = u64::from(dispatch.max_attempts.max(1));
    Duration::from_millis(dispatch.timeout_ms.saturating_mul(attempts)) + REQUEST_TIMEOUT_MARGIN
}

/// 构建路由
///
/// `/v1` 下除模型列表外都要求认证，认证先于限流执行。
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.server.body_limit;
    let timeout = request_timeout(state.processor.dispatch_config());

    let api = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/images/generations", post(handlers::images_generations))
        .route("/v1/embeddings", post(handlers::embeddings))
        .route("/v1/moderations", post(handlers::moderations))
        .route("/v1/audio/speech", post(handlers::audio_speech))
        .route(
            "/v1/audio/transcriptions",
            post(handlers::audio_transcriptions),
        )
        // 后添加的层在外层
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .route_layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    let admin = Router::new()
        .route("/admin/keys", post(admin::issue_key))
        .route("/admin/keys/:key", get(admin::get_key))
        .route("/admin/keys/:key/ban", post(admin::ban_key))
        .route("/admin/keys/:key/unban", post(admin::unban_key))
        .route("/admin/keys/:key/tier", post(admin::set_tier))
        .route(
            "/admin/credentials",
            put(admin::upsert_credential).get(admin::list_credentials),
        )
        .route(
            "/admin/credentials/:name/enable",
            post(admin::enable_credential),
        )
        .route(
            "/admin/credentials/:name/disable",
            post(admin::disable_credential),
        )
        .route(
            "/admin/credentials/:name/reset",
            post(admin::reset_credential),
        )
        .route_layer(from_fn_with_state(state.clone(), middleware::admin_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/models", get(handlers::list_models))
        .merge(api)
        .merge(admin)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::GATEWAY_TIMEOUT,
                    timeout,
                )),
        )
}

/// 定期清理闲置的限流桶
fn spawn_bucket_pruner(limiter: std::sync::Arc<RateLimiter>, cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(BUCKET_IDLE);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = limiter.prune(BUCKET_IDLE);
                    if removed > 0 {
                        tracing::debug!("[SERVER] 清理闲置限流桶: removed={}", removed);
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    });
}

/// 在已绑定的监听器上提供服务，直到取消
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel_token: CancellationToken,
) -> std::io::Result<()> {
    spawn_bucket_pruner(state.limiter.clone(), cancel_token.clone());
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await
}

/// 绑定配置中的地址并启动服务
pub async fn run_server(state: AppState, cancel_token: CancellationToken) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.server.host, state.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("[SERVER] 网关已启动: http://{}", listener.local_addr()?);
    serve(listener, state, cancel_token).await?;
    tracing::info!("[SERVER] 网关已停止");
    Ok(())
}
