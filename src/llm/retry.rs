//! provider 内重试：指数退避 + 上限，仅对瞬时错误生效

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::LlmError;

/// 重试配置（对应 `[llm.retry]`）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// 测试用：不等待
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// 第 attempt 次失败后的等待时长（attempt 从 1 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// 执行 op，遇到可重试错误按退避重试，其余错误立即返回
    pub async fn run<F, Fut>(&self, label: &str, mut op: F) -> Result<String, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, LlmError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        provider = %label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient LLM error, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::llm::{LlmClient, MockLlmClient};
    use crate::memory::Message;

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.delay_for(1), Duration::from_millis(2000));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(4000));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(8000));
        assert_eq!(cfg.delay_for(4), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let mock = MockLlmClient::failing(LlmError::Transient("503".into()));
        let calls = mock.call_counter();
        let msgs = [Message::user("x")];
        let res = RetryConfig::no_delay(3)
            .run("a", || mock.complete(&msgs))
            .await;
        assert!(matches!(res, Err(LlmError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_errors_are_not_retried() {
        let mock = MockLlmClient::failing(LlmError::Auth("no key".into()));
        let calls = mock.call_counter();
        let msgs = [Message::user("x")];
        let err = RetryConfig::no_delay(3)
            .run("a", || mock.complete(&msgs))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_after_transient_failure() {
        let attempts = AtomicU32::new(0);
        let res = RetryConfig::no_delay(3)
            .run("a", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(LlmError::Timeout(1))
                } else {
                    Ok("ok".to_string())
                }
            })
            .await;
        assert_eq!(res.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
