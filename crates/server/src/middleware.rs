//! 认证、限流与管理接口守卫

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tollway_core::models::account::{User, UserUpdate};
use tollway_core::{GatewayError, GatewayResult};

use crate::rate_limit::RateDecision;
use crate::response::{rate_limited, ApiError};
use crate::state::AppState;

/// 常量时间比较，避免时序侧信道
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// 从 `Authorization: Bearer <key>` 中取出密钥
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn client_ip<'a>(headers: &'a HeaderMap, header_name: &str) -> Option<&'a str> {
    headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// 解析并校验调用方
///
/// 顺带处理高级套餐过期、到期补充额度以及免费用户的 IP 绑定。
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> GatewayResult<User> {
    let api_key = bearer_token(headers).ok_or_else(GatewayError::missing_key)?;
    let mut user = state
        .store
        .get_user(api_key)
        .await?
        .ok_or_else(GatewayError::invalid_key)?;
    if user.banned {
        tracing::info!("[AUTH] 已封禁的密钥: user={}", user.id);
        return Err(GatewayError::banned_key());
    }

    let now = tollway_core::unix_now();
    state.ledger().enforce_premium_expiry(&mut user, now).await?;
    if let Some(balance) = state.ledger().refill_if_due(&user, now).await? {
        user.balance = balance;
        user.last_refill = now;
    }

    if !user.is_premium() && state.server.ip_binding {
        if let Some(ip) = client_ip(headers, &state.server.ip_header) {
            match user.bound_ip.as_deref() {
                None => {
                    let update = UserUpdate {
                        bound_ip: Some(Some(ip.to_string())),
                        ..Default::default()
                    };
                    state.store.update_user(&user.api_key, &update).await?;
                    tracing::info!("[AUTH] 免费密钥绑定 IP: user={} ip={}", user.id, ip);
                    user.bound_ip = Some(ip.to_string());
                }
                Some(bound) if bound != ip => {
                    tracing::warn!(
                        "[AUTH] IP 不匹配: user={} bound={} current={}",
                        user.id,
                        bound,
                        ip
                    );
                    return Err(GatewayError::Access(
                        "This API key is bound to a different IP address.".to_string(),
                    ));
                }
                Some(_) => {}
            }
        }
    }

    Ok(user)
}

/// 认证中间件，校验通过后把 `User` 放入请求扩展
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match authenticate(&state, request.headers()).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(err) => ApiError(err).into_response(),
    }
}

/// 限流中间件，需在认证之后运行
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(user) = request.extensions().get::<User>() else {
        return ApiError(GatewayError::missing_key()).into_response();
    };

    match state.limiter.check(&user.api_key, user.tier) {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Limited { retry_after } => {
            tracing::debug!(
                "[AUTH] 触发限流: user={} tier={} retry_after_ms={}",
                user.id,
                user.tier,
                retry_after.as_millis()
            );
            rate_limited(retry_after)
        }
    }
}

/// 管理接口守卫：`Authorization: Bearer <admin_key>` 或 `X-Admin-Key`
pub async fn admin_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let expected = state.server.admin_key.as_str();
    if expected.is_empty() {
        return ApiError(GatewayError::Access(
            "The admin API is disabled.".to_string(),
        ))
        .into_response();
    }

    let headers = request.headers();
    let provided = bearer_token(headers).or_else(|| {
        headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
    });

    match provided {
        Some(key) if constant_time_eq(key, expected) => next.run(request).await,
        Some(_) => {
            tracing::warn!("[AUTH] 管理密钥错误: path={}", request.uri().path());
            ApiError(GatewayError::invalid_key()).into_response()
        }
        None => ApiError(GatewayError::missing_key()).into_response(),
    }
}
