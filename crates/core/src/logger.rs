//! 日志管理模块
//!
//! 初始化 tracing 订阅器，并提供日志脱敏工具。
use crate::config::LoggingConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// 覆盖日志级别的环境变量
pub const LOG_ENV: &str = "TOLLWAY_LOG";

/// 初始化全局日志，重复调用时返回错误
pub fn init_logging(config: &LoggingConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| format!("无效的日志级别 {}: {e}", config.level))?;

    let registry = Registry::default().with(filter);
    let result = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    result.map_err(|e| format!("日志初始化失败: {e}"))
}

static SANITIZE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"Bearer\s+[A-Za-z0-9._-]+", "Bearer ***"),
        (r"sk-[A-Za-z0-9_-]{8,}", "sk-***"),
        (
            r#"api[_-]?key["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "api_key: ***",
        ),
        (
            r#"[Aa]uthorization["']?\s*[:=]\s*["']?[A-Za-z0-9._\s-]+"#,
            "authorization: ***",
        ),
        (
            r#"secret["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "secret: ***",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// 脱敏日志内容（上游错误体可能回显密钥）
pub fn sanitize_log_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (re, replacement) in SANITIZE_PATTERNS.iter() {
        sanitized = re.replace_all(&sanitized, *replacement).to_string();
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::sanitize_log_message;

    #[test]
    fn test_sanitize_bearer_token() {
        let input = "Authorization: Bearer abcDEF123._-XYZ";
        let output = sanitize_log_message(input);
        assert!(!output.contains("abcDEF123"));
        assert!(output.contains("***"));
    }

    #[test]
    fn test_sanitize_api_key() {
        let input = r#"request api_key="tw-test_123.456-ABC" end"#;
        let output = sanitize_log_message(input);
        assert!(output.contains("api_key: ***"));
        assert!(!output.contains("tw-test_123"));
    }

    #[test]
    fn test_sanitize_openai_key_in_error_body() {
        let input = r#"{"error":{"message":"Incorrect API key provided: sk-proj-abcdef123456"}}"#;
        let output = sanitize_log_message(input);
        assert!(!output.contains("abcdef123456"));
        assert!(output.contains("Incorrect API key provided"));
    }

    #[test]
    fn test_plain_message_untouched() {
        let input = "[ROUTE] request_id=abc model=gpt-4o";
        assert_eq!(sanitize_log_message(input), input);
    }
}
