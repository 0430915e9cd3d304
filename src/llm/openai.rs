//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；Gemini、Groq、Ollama 都走这一实现，
//! 差异只在 ProviderConfig（端点、模型、凭证环境变量、超时）。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// 本地端点（如 Ollama）不校验 key，但 OpenAIConfig 需要一个值
const LOCAL_PLACEHOLDER_KEY: &str = "local";

/// OpenAI 兼容客户端：持有 Client 与 model 名，complete 时转 Message 为 API 格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    provider: String,
    model: String,
    /// 需要凭证但环境变量缺失时记录变量名，调用时直接返回 Auth 错误
    missing_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<&str>) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key.unwrap_or(LOCAL_PLACEHOLDER_KEY));

        Self {
            client: Client::with_config(config),
            provider: model.to_string(),
            model: model.to_string(),
            missing_key: None,
        }
    }

    /// 按 provider 配置构建；凭证从 `api_key_env` 指定的环境变量读取
    pub fn from_provider(provider: &ProviderConfig) -> Self {
        let key = provider
            .api_key_env
            .as_deref()
            .map(|var| (var, std::env::var(var).ok().filter(|v| !v.trim().is_empty())));

        let mut client = Self::new(
            &provider.base_url,
            &provider.model,
            key.as_ref().and_then(|(_, v)| v.as_deref()),
        );
        client.provider = provider.id.clone();
        if let Some((var, None)) = key {
            tracing::warn!(provider = %provider.id, "{} not set, provider will be skipped", var);
            client.missing_key = Some(var.to_string());
        }
        client
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(|e| LlmError::Api(e.to_string()))?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(|e| LlmError::Api(e.to_string()))?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(|e| LlmError::Api(e.to_string()))?,
                    ),
                };
                Ok(msg)
            })
            .collect()
    }
}

/// 按错误文本归类：限流 / 认证 / 瞬时 / 其他
pub fn classify_error(provider: &str, message: &str) -> LlmError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
        LlmError::RateLimited {
            provider: provider.to_string(),
        }
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("api key")
        || lower.contains("unauthorized")
    {
        LlmError::Auth(message.to_string())
    } else if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connect")
        || lower.contains("connection")
        || lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
        || lower.contains("overloaded")
    {
        LlmError::Transient(message.to_string())
    } else {
        LlmError::Api(message.to_string())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Some(var) = &self.missing_key {
            return Err(LlmError::Auth(format!("{} not set", var)));
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| classify_error(&self.provider, &e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error("groq", "status 429: Rate limit reached"),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_error("groq", "401 Unauthorized: invalid api key"),
            LlmError::Auth(_)
        ));
        assert!(classify_error("groq", "error sending request: connection refused").is_retryable());
        assert!(classify_error("groq", "503 Service Unavailable").is_retryable());
        assert!(matches!(
            classify_error("groq", "model not found"),
            LlmError::Api(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let provider = ProviderConfig {
            id: "gemini".into(),
            api_key_env: Some("WAGGLE_TEST_KEY_THAT_IS_NEVER_SET".into()),
            base_url: "http://127.0.0.1:9".into(),
            ..ProviderConfig::default()
        };
        let client = OpenAiClient::from_provider(&provider);
        let err = client
            .complete(&[Message::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
    }
}
