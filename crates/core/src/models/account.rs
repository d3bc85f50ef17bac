//! 调用方账户模型

use serde::{Deserialize, Serialize};

/// 免费等级
pub const FREE_TIER: u8 = 0;

/// 调用方账户
///
/// 首次签发密钥时创建，封禁为软删除，不会物理删除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub api_key: String,
    /// 0 为免费，N > 0 为第 N 级高级套餐
    pub tier: u8,
    /// 剩余额度，流式计费后可能短暂为负
    pub balance: i64,
    pub banned: bool,
    /// 免费用户首次使用时绑定的 IP
    pub bound_ip: Option<String>,
    /// 上次补充额度的时间（Unix 秒）
    pub last_refill: i64,
    /// 高级套餐到期时间（Unix 秒）
    pub premium_expiry: Option<i64>,
    pub created_at: i64,
}

impl User {
    /// 签发新账户
    pub fn issue(tier: u8, balance: i64, now: i64) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            api_key: format!("tw-{}", uuid::Uuid::new_v4().simple()),
            id,
            tier,
            balance,
            banned: false,
            bound_ip: None,
            last_refill: now,
            premium_expiry: None,
            created_at: now,
        }
    }

    pub fn is_premium(&self) -> bool {
        self.tier > FREE_TIER
    }

    /// 高级套餐是否已过期
    pub fn premium_expired(&self, now: i64) -> bool {
        self.is_premium() && self.premium_expiry.is_some_and(|expiry| now > expiry)
    }
}

/// 账户部分更新
///
/// 余额不在此处修改，统一走原子增减。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserUpdate {
    pub tier: Option<u8>,
    pub banned: Option<bool>,
    pub bound_ip: Option<Option<String>>,
    pub premium_expiry: Option<Option<i64>>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.tier.is_none()
            && self.banned.is_none()
            && self.bound_ip.is_none()
            && self.premium_expiry.is_none()
    }
}
