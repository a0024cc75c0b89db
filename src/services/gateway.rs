//! 生成模型网关 - 业务能力层
//!
//! `TextGenerator` 是唯一的调用接口：`generate(prompt) -> text`。
//! `RateLimitedGateway` 包装任意实现，提供：
//! - 进程级串行化（同一时刻只有一个请求在途）
//! - 成功后的固定间隔
//! - 配额错误的有限次重试

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::GatewayError;

/// 服务端建议等待时间之外额外等待的秒数
const RETRY_HINT_PADDING_SECS: f64 = 5.0;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GatewayError>;
}

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// 没有建议等待时间时使用的冷却时间
    pub cooldown: Duration,
    /// 每次成功调用后的等待时间
    pub inter_call_delay: Duration,
    /// 是否按服务端提示的 `retry in Xs` 等待
    pub honor_retry_hint: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown: Duration::from_secs(45),
            inter_call_delay: Duration::from_secs(1),
            honor_retry_hint: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.gateway_max_attempts.max(1),
            cooldown: config.gateway_cooldown(),
            inter_call_delay: config.gateway_inter_call_delay(),
            honor_retry_hint: true,
        }
    }

    /// 不等待的策略，用于测试
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            cooldown: Duration::ZERO,
            inter_call_delay: Duration::ZERO,
            honor_retry_hint: false,
        }
    }

    /// 两次尝试之间的等待时间
    fn wait_before_retry(&self, err: &GatewayError) -> Duration {
        match err {
            GatewayError::Quota {
                retry_after: Some(hint),
                ..
            } if self.honor_retry_hint => *hint,
            _ => self.cooldown,
        }
    }
}

/// 带限流和重试的网关
pub struct RateLimitedGateway {
    inner: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
    in_flight: Semaphore,
}

impl RateLimitedGateway {
    pub fn new(inner: Arc<dyn TextGenerator>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            in_flight: Semaphore::new(1),
        }
    }
}

#[async_trait]
impl TextGenerator for RateLimitedGateway {
    async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| GatewayError::Permanent("gateway closed".to_string()))?;

        let max_attempts = self.policy.max_attempts;
        for attempt in 1..=max_attempts {
            debug!("🤖 调用生成模型 (第 {}/{} 次)", attempt, max_attempts);
            match self.inner.generate(prompt).await {
                Ok(text) => {
                    if !self.policy.inter_call_delay.is_zero() {
                        tokio::time::sleep(self.policy.inter_call_delay).await;
                    }
                    return Ok(text);
                }
                Err(err) if err.is_retryable() => {
                    if attempt == max_attempts {
                        warn!("❌ 配额错误，已重试 {} 次: {}", max_attempts, err);
                        break;
                    }
                    let wait = self.policy.wait_before_retry(&err);
                    warn!(
                        "⏳ 配额错误 (第 {}/{} 次)，{:.1}s 后重试: {}",
                        attempt,
                        max_attempts,
                        wait.as_secs_f64(),
                        err
                    );
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(GatewayError::Exhausted {
            attempts: max_attempts,
        })
    }
}

static RETRY_HINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"retry in ([\d.]+)s").expect("retry hint regex"));

/// 从错误信息中提取建议等待时间（附加 5 秒余量）
pub fn parse_retry_hint(message: &str) -> Option<Duration> {
    let lower = message.to_lowercase();
    let caps = RETRY_HINT_RE.captures(&lower)?;
    let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
    // 超出 Duration 范围的提示按没有提示处理
    Duration::try_from_secs_f64(secs.trunc() + RETRY_HINT_PADDING_SECS).ok()
}

/// 判断错误信息是否为配额 / 频率限制
pub fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["429", "quota", "rate limit", "resourceexhausted"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// 把底层错误信息归类为网关错误
pub fn classify_error(message: impl Into<String>) -> GatewayError {
    let message = message.into();
    if is_quota_message(&message) {
        let retry_after = parse_retry_hint(&message);
        GatewayError::Quota {
            message,
            retry_after,
        }
    } else {
        GatewayError::Permanent(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        responses: Mutex<VecDeque<Result<String, GatewayError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, GatewayError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, _prompt: &str) -> Result<String, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(classify_error("429 quota exceeded")))
        }
    }

    fn quota() -> Result<String, GatewayError> {
        Err(classify_error("429 Resource has been exhausted (quota)"))
    }

    #[test]
    fn test_classify_error() {
        assert!(classify_error("HTTP 429 Too Many Requests").is_retryable());
        assert!(classify_error("ResourceExhausted").is_retryable());
        assert!(classify_error("Rate limit reached").is_retryable());
        assert!(!classify_error("invalid api key").is_retryable());
    }

    #[test]
    fn test_parse_retry_hint_adds_padding() {
        assert_eq!(
            parse_retry_hint("Quota exceeded. Please retry in 12.7s."),
            Some(Duration::from_secs(17))
        );
        assert_eq!(parse_retry_hint("quota exceeded"), None);
    }

    #[test]
    fn test_oversized_retry_hint_falls_back_to_cooldown() {
        assert_eq!(parse_retry_hint("429, retry in 99999999999999999999s"), None);
        let err = classify_error("429, retry in 99999999999999999999s");
        assert!(err.is_retryable());
        assert_eq!(
            RetryPolicy::default().wait_before_retry(&err),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn test_zero_cooldown_still_honors_hint() {
        let policy = RetryPolicy {
            cooldown: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let hinted = classify_error("429, retry in 3s");
        assert_eq!(policy.wait_before_retry(&hinted), Duration::from_secs(8));
        assert_eq!(RetryPolicy::immediate(3).wait_before_retry(&hinted), Duration::ZERO);
    }

    #[test]
    fn test_wait_prefers_hint_over_cooldown() {
        let policy = RetryPolicy::default();
        let hinted = classify_error("429, retry in 3s");
        assert_eq!(policy.wait_before_retry(&hinted), Duration::from_secs(8));
        let plain = classify_error("429");
        assert_eq!(policy.wait_before_retry(&plain), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_always_quota_stops_after_exactly_three_attempts() {
        let inner = Scripted::new(vec![quota(), quota(), quota(), Ok("late".into())]);
        let gateway = RateLimitedGateway::new(inner.clone(), RetryPolicy::immediate(3));

        let err = tokio_test::assert_err!(gateway.generate("prompt").await);
        assert!(matches!(err, GatewayError::Exhausted { attempts: 3 }));
        assert_eq!(
            err.to_string(),
            "API request failed after 3 attempts. Please try again later."
        );
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_quota_then_success() {
        let inner = Scripted::new(vec![quota(), Ok("answer".into())]);
        let gateway = RateLimitedGateway::new(inner.clone(), RetryPolicy::immediate(3));
        assert_eq!(gateway.generate("prompt").await.unwrap(), "answer");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let inner = Scripted::new(vec![Err(GatewayError::Permanent("bad request".into()))]);
        let gateway = RateLimitedGateway::new(inner.clone(), RetryPolicy::immediate(3));
        let err = gateway.generate("prompt").await.unwrap_err();
        assert!(matches!(err, GatewayError::Permanent(_)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
