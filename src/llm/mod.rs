//! LLM 层：客户端抽象、OpenAI 兼容实现、Mock、重试、限流、审计与多 provider 容灾电路

pub mod audit;
pub mod circuit;
pub mod mock;
pub mod openai;
pub mod rate_limit;
pub mod retry;
pub mod traits;

pub use audit::{AuditConfig, LlmAttempt, LlmAuditLog};
pub use circuit::{LlmCircuit, ProviderSlot};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use rate_limit::{PersistentRateLimiter, RateLimitConfig};
pub use retry::RetryConfig;
pub use traits::{LlmClient, LlmError};
