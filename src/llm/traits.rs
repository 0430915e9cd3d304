//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容端点 / Mock）实现 LlmClient::complete；错误统一为 LlmError，
//! 由 RetryConfig 与 LlmCircuit 依据 is_retryable 决定重试还是切换 provider。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// provider 调用错误分类
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// 连接失败 / 5xx 等瞬时错误，可重试
    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Provider timed out after {0}s")]
    Timeout(u64),

    /// 缺少凭证或认证失败：不重试，直接切换
    #[error("Auth/config error: {0}")]
    Auth(String),

    #[error("Rate limited: {provider}")]
    RateLimited { provider: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("All intelligence providers failed (attempted: {})", attempted.join(", "))]
    AllProvidersExhausted { attempted: Vec<String> },
}

impl LlmError {
    /// 仅瞬时错误与超时走 provider 内重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Transient(_) | LlmError::Timeout(_))
    }

    /// 审计日志里的 outcome 字段
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Transient(_) => "transient",
            LlmError::Timeout(_) => "timeout",
            LlmError::Auth(_) => "auth",
            LlmError::RateLimited { .. } => "rate_limited",
            LlmError::Api(_) => "api_error",
            LlmError::AllProvidersExhausted { .. } => "exhausted",
        }
    }
}

/// LLM 客户端 trait：给定有序消息返回文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;
}
