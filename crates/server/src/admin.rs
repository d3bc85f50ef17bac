//! 管理接口：签发密钥、封禁、调整等级、维护上游凭证

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tollway_core::models::account::{User, UserUpdate, FREE_TIER};
use tollway_core::models::credential::ProviderCredential;
use tollway_core::GatewayError;

use crate::response::ApiResult;
use crate::state::AppState;

const DAY_SECS: i64 = 86_400;

fn key_not_found(key: &str) -> GatewayError {
    GatewayError::Validation {
        message: format!("No account found for key `{}`.", mask_secret(key)),
        param: Some("key".to_string()),
        code: Some("key_not_found".to_string()),
        status: 404,
    }
}

fn credential_not_found(name: &str) -> GatewayError {
    GatewayError::Validation {
        message: format!("No credential named `{name}`."),
        param: Some("name".to_string()),
        code: Some("credential_not_found".to_string()),
        status: 404,
    }
}

/// 只保留首尾少量字符
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

fn premium_expiry(
    tier: u8,
    premium_days: Option<i64>,
    now: i64,
) -> Result<Option<i64>, GatewayError> {
    if tier == FREE_TIER {
        return Ok(None);
    }
    let Some(days) = premium_days.filter(|days| *days > 0) else {
        return Ok(None);
    };
    days.checked_mul(DAY_SECS)
        .and_then(|secs| now.checked_add(secs))
        .map(Some)
        .ok_or_else(|| GatewayError::Validation {
            message: format!("premium_days `{days}` is out of range."),
            param: Some("premium_days".to_string()),
            code: None,
            status: 400,
        })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IssueKeyRequest {
    pub tier: u8,
    pub balance: Option<i64>,
    pub premium_days: Option<i64>,
}

/// `POST /admin/keys`
pub async fn issue_key(
    State(state): State<AppState>,
    Json(body): Json<IssueKeyRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let now = tollway_core::unix_now();
    let balance = body.balance.unwrap_or(state.billing().initial_balance);
    let mut user = User::issue(body.tier, balance, now);
    user.premium_expiry = premium_expiry(body.tier, body.premium_days, now)?;
    state.store.insert_user(&user).await.map_err(GatewayError::from)?;
    tracing::info!(
        "[ADMIN] 签发密钥: user={} tier={} balance={}",
        user.id,
        user.tier,
        user.balance
    );
    Ok((StatusCode::CREATED, Json(user)))
}

/// `GET /admin/keys/:key`
pub async fn get_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<User>> {
    let user = state
        .store
        .get_user(&key)
        .await
        .map_err(GatewayError::from)?
        .ok_or_else(|| key_not_found(&key))?;
    Ok(Json(user))
}

async fn update_key(state: &AppState, key: &str, update: UserUpdate) -> ApiResult<Json<User>> {
    let updated = state
        .store
        .update_user(key, &update)
        .await
        .map_err(GatewayError::from)?;
    if !updated {
        return Err(key_not_found(key).into());
    }
    let user = state
        .store
        .get_user(key)
        .await
        .map_err(GatewayError::from)?
        .ok_or_else(|| key_not_found(key))?;
    Ok(Json(user))
}

/// `POST /admin/keys/:key/ban`
pub async fn ban_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<User>> {
    let update = UserUpdate {
        banned: Some(true),
        ..Default::default()
    };
    let user = update_key(&state, &key, update).await?;
    tracing::warn!("[ADMIN] 封禁密钥: user={}", user.id);
    Ok(user)
}

/// `POST /admin/keys/:key/unban`
pub async fn unban_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<User>> {
    let update = UserUpdate {
        banned: Some(false),
        ..Default::default()
    };
    let user = update_key(&state, &key, update).await?;
    tracing::info!("[ADMIN] 解封密钥: user={}", user.id);
    Ok(user)
}

#[derive(Debug, Deserialize)]
pub struct SetTierRequest {
    pub tier: u8,
    #[serde(default)]
    pub premium_days: Option<i64>,
}

/// `POST /admin/keys/:key/tier`，降为免费时清除到期时间
pub async fn set_tier(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<SetTierRequest>,
) -> ApiResult<Json<User>> {
    let now = tollway_core::unix_now();
    let update = UserUpdate {
        tier: Some(body.tier),
        premium_expiry: Some(premium_expiry(body.tier, body.premium_days, now)?),
        ..Default::default()
    };
    let user = update_key(&state, &key, update).await?;
    tracing::info!(
        "[ADMIN] 调整等级: user={} tier={} expiry={:?}",
        user.id,
        user.tier,
        user.premium_expiry
    );
    Ok(user)
}

/// `PUT /admin/credentials`，已有统计保留
pub async fn upsert_credential(
    State(state): State<AppState>,
    Json(credential): Json<ProviderCredential>,
) -> ApiResult<Json<Value>> {
    state.pool().upsert(&credential).await?;
    tracing::info!(
        "[ADMIN] 更新凭证: credential={} provider={} models={}",
        credential.name,
        credential.provider_name,
        credential.models.len()
    );
    Ok(Json(json!({ "name": credential.name, "updated": true })))
}

/// `GET /admin/credentials`，密钥打码
pub async fn list_credentials(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let credentials: Vec<ProviderCredential> = state
        .pool()
        .list()
        .await?
        .into_iter()
        .map(|mut credential| {
            credential.api_key = mask_secret(&credential.api_key);
            credential
        })
        .collect();
    Ok(Json(json!({ "object": "list", "data": credentials })))
}

/// `POST /admin/credentials/:name/enable`
pub async fn enable_credential(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.pool().enable(&name).await? {
        return Err(credential_not_found(&name).into());
    }
    Ok(Json(json!({ "name": name, "disabled": false })))
}

/// `POST /admin/credentials/:name/disable`
pub async fn disable_credential(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.pool().disable(&name).await? {
        return Err(credential_not_found(&name).into());
    }
    Ok(Json(json!({ "name": name, "disabled": true })))
}

/// `POST /admin/credentials/:name/reset`
pub async fn reset_credential(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let reset = state.pool().reset_stats(&name).await?;
    if reset == 0 {
        return Err(credential_not_found(&name).into());
    }
    tracing::info!("[ADMIN] 清零统计: credential={} models={}", name, reset);
    Ok(Json(json!({ "name": name, "reset_models": reset })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-abcdefghijkl"), "sk-a****ijkl");
        assert_eq!(mask_secret("short"), "****");
    }

    #[test]
    fn test_premium_expiry() {
        assert_eq!(premium_expiry(0, Some(30), 1_000).unwrap(), None);
        assert_eq!(
            premium_expiry(2, Some(1), 1_000).unwrap(),
            Some(1_000 + DAY_SECS)
        );
        assert_eq!(premium_expiry(2, None, 1_000).unwrap(), None);
        assert_eq!(premium_expiry(2, Some(0), 1_000).unwrap(), None);
    }

    #[test]
    fn test_premium_expiry_rejects_overflow() {
        let err = premium_expiry(2, Some(i64::MAX), 1_000).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(matches!(
            err,
            GatewayError::Validation { ref param, .. } if param.as_deref() == Some("premium_days")
        ));
        // 免费等级不计算到期时间
        assert_eq!(premium_expiry(0, Some(i64::MAX), 1_000).unwrap(), None);
    }
}
