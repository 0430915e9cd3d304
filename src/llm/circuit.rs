//! 多 provider 容灾电路
//!
//! 按优先级排列的 provider 列表 + 共享游标：
//! - 每次调用从游标处开始，依次尝试全部 provider（环绕）
//! - 某个 provider 失败：游标前移到下一个；成功：游标复位到 0（主 provider）
//! - 尝试前先过该 provider 的限流器，额度耗尽直接视为 RateLimited，不发请求
//! - 单个 provider 内部按 RetryConfig 对瞬时错误重试，每次请求受 provider 超时约束
//! - 全部失败返回 AllProvidersExhausted

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::llm::audit::{LlmAttempt, LlmAuditLog};
use crate::llm::rate_limit::PersistentRateLimiter;
use crate::llm::retry::RetryConfig;
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// 电路中的一个 provider
pub struct ProviderSlot {
    pub id: String,
    pub model: String,
    pub timeout: Duration,
    pub client: Arc<dyn LlmClient>,
    pub limiter: Option<Arc<PersistentRateLimiter>>,
}

impl ProviderSlot {
    pub fn new(id: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        let id = id.into();
        Self {
            model: id.clone(),
            id,
            timeout: Duration::from_secs(30),
            client,
            limiter: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<PersistentRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }
}

pub struct LlmCircuit {
    providers: Vec<ProviderSlot>,
    cursor: AtomicUsize,
    retry: RetryConfig,
    audit: Arc<LlmAuditLog>,
}

impl LlmCircuit {
    /// providers 已按优先级排好序（下标 0 为主 provider）
    pub fn new(providers: Vec<ProviderSlot>) -> Self {
        Self {
            providers,
            cursor: AtomicUsize::new(0),
            retry: RetryConfig::default(),
            audit: Arc::new(LlmAuditLog::default()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_audit(mut self, audit: Arc<LlmAuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id.as_str()).collect()
    }

    /// 下一次调用首先尝试的 provider 下标
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub async fn invoke(&self, messages: &[Message]) -> Result<String, LlmError> {
        let n = self.providers.len();
        let request_id = uuid::Uuid::new_v4().to_string();
        let input_len: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        let start_idx = self.cursor.load(Ordering::SeqCst) % n.max(1);
        let mut attempted = Vec::with_capacity(n);

        for offset in 0..n {
            let idx = (start_idx + offset) % n;
            let slot = &self.providers[idx];
            attempted.push(slot.id.clone());

            let started = Instant::now();
            let result = self.call_provider(slot, messages).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let (outcome, output_len, preview) = match &result {
                Ok(text) => ("ok", text.chars().count(), LlmAttempt::preview(text)),
                Err(e) => (e.kind(), 0, LlmAttempt::preview(&e.to_string())),
            };
            self.audit.record(&LlmAttempt {
                request_id: &request_id,
                provider: &slot.id,
                model: &slot.model,
                outcome,
                latency_ms,
                input_len,
                output_len,
                response_preview: preview,
            });

            match result {
                Ok(text) => {
                    self.cursor.store(0, Ordering::SeqCst);
                    return Ok(text);
                }
                Err(e) => {
                    let next = (idx + 1) % n;
                    self.cursor.store(next, Ordering::SeqCst);
                    tracing::warn!(
                        provider = %slot.id,
                        next = %self.providers[next].id,
                        "Provider failed, switching: {}",
                        e
                    );
                }
            }
        }

        tracing::error!(attempted = ?attempted, "All intelligence providers failed");
        Err(LlmError::AllProvidersExhausted { attempted })
    }

    async fn call_provider(
        &self,
        slot: &ProviderSlot,
        messages: &[Message],
    ) -> Result<String, LlmError> {
        if let Some(limiter) = &slot.limiter {
            if !limiter.try_acquire() {
                return Err(LlmError::RateLimited {
                    provider: slot.id.clone(),
                });
            }
        }
        let secs = slot.timeout.as_secs();
        self.retry
            .run(&slot.id, || async {
                match tokio::time::timeout(slot.timeout, slot.client.complete(messages)).await {
                    Ok(res) => res,
                    Err(_) => Err(LlmError::Timeout(secs)),
                }
            })
            .await
    }
}

#[async_trait]
impl LlmClient for LlmCircuit {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.invoke(messages).await
    }
}
