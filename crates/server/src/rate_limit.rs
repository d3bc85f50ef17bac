//! 按 API Key 的令牌桶限流
//!
//! 桶容量等于每秒配额，按经过的时间连续补充。

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tollway_core::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    updated_at: Instant,
}

/// 限流判定结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    pub fn check(&self, api_key: &str, tier: u8) -> RateDecision {
        self.check_at(api_key, tier, Instant::now())
    }

    /// 在指定时刻消耗一个令牌
    pub fn check_at(&self, api_key: &str, tier: u8, now: Instant) -> RateDecision {
        let rate = f64::from(self.config.limit_for_tier(tier).max(1));
        let mut bucket = self
            .buckets
            .entry(api_key.to_string())
            .or_insert(TokenBucket {
                tokens: rate,
                updated_at: now,
            });

        let elapsed = now.saturating_duration_since(bucket.updated_at).as_secs_f64();
        // 等级变化后容量随之变化
        bucket.tokens = (bucket.tokens + elapsed * rate).min(rate);
        bucket.updated_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Allowed {
                remaining: bucket.tokens.floor() as u32,
            }
        } else {
            let wait = (1.0 - bucket.tokens) / rate;
            RateDecision::Limited {
                retry_after: Duration::from_secs_f64(wait),
            }
        }
    }

    /// 清理长时间未使用的桶
    pub fn prune(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.updated_at) < idle);
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_tier_burst_then_limited() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("tw-free", 0, now).is_allowed());
        }
        let decision = limiter.check_at("tw-free", 0, now);
        assert!(!decision.is_allowed());

        // 一秒后补满
        let later = now + Duration::from_secs(1);
        assert!(limiter.check_at("tw-free", 0, later).is_allowed());
    }

    #[test]
    fn test_premium_tier_has_larger_bucket() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let now = Instant::now();
        let allowed = (0..12)
            .filter(|_| limiter.check_at("tw-premium", 2, now).is_allowed())
            .count();
        assert_eq!(allowed, 10);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig {
            free_per_second: 1,
            premium_per_second: 1,
        });
        let now = Instant::now();
        assert!(limiter.check_at("a", 0, now).is_allowed());
        assert!(limiter.check_at("b", 0, now).is_allowed());
        match limiter.check_at("a", 0, now) {
            RateDecision::Limited { retry_after } => {
                assert!(retry_after <= Duration::from_secs(1));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_prune_idle_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        limiter.check("a", 0);
        assert_eq!(limiter.prune(Duration::from_secs(60)), 0);
        assert_eq!(limiter.prune(Duration::ZERO), 1);
        assert!(limiter.is_empty());
    }
}
