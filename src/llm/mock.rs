//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 固定回复或固定失败，并记录调用次数，便于断言缓存命中时零调用、容灾顺序等。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

#[derive(Debug, Clone)]
enum Behavior {
    Reply(String),
    Fail(LlmError),
    /// 回显最后一条 user 消息
    Echo,
}

/// Mock 客户端
#[derive(Debug, Clone)]
pub struct MockLlmClient {
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::echo()
    }
}

impl MockLlmClient {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            behavior: Behavior::Reply(text.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(err: LlmError) -> Self {
        Self {
            behavior: Behavior::Fail(err),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn echo() -> Self {
        Self {
            behavior: Behavior::Echo,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 共享调用计数（clone 后仍指向同一计数器）
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Reply(text) => Ok(text.clone()),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Echo => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(format!("Echo from Mock: {}", last_user))
            }
        }
    }
}
