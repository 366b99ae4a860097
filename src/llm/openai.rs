//! OpenAI 兼容后端
//!
//! 角色名作为消息的 `name` 字段传给 API，使多方对话在同一上下文里可区分。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::chat::{Message, Role};
use crate::config::LlmSection;
use crate::llm::LlmClient;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub requests: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn record(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn totals(&self) -> (u64, u64, u64) {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

/// API 的 name 字段只接受 `[A-Za-z0-9_-]`，其余字符替换为下划线
pub fn speaker_name(speaker: &str) -> Option<String> {
    let name: String = speaker
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(64)
        .collect();
    (!name.is_empty()).then_some(name)
}

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn from_section(cfg: &LlmSection, api_key: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = cfg.base_url.as_deref() {
            config = config.with_api_base(url);
        }
        Self {
            client: Client::with_config(config),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            usage: TokenUsage::default(),
        }
    }

    fn convert(message: &Message) -> Result<ChatCompletionRequestMessage, String> {
        let name = speaker_name(&message.speaker);
        let converted = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(message.content.clone())
                .build()
                .map(ChatCompletionRequestMessage::System),
            Role::User => {
                let mut args = ChatCompletionRequestUserMessageArgs::default();
                args.content(message.content.clone());
                if let Some(name) = name {
                    args.name(name);
                }
                args.build().map(ChatCompletionRequestMessage::User)
            }
            Role::Assistant => {
                let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                args.content(message.content.clone());
                if let Some(name) = name {
                    args.name(name);
                }
                args.build().map(ChatCompletionRequestMessage::Assistant)
            }
        };
        converted.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.totals()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let messages = messages
            .iter()
            .map(Self::convert)
            .collect::<Result<Vec<_>, _>>()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(messages)
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            self.usage
                .record(usage.prompt_tokens as u64, usage.completion_tokens as u64);
            tracing::debug!(
                prompt = usage.prompt_tokens,
                completion = usage.completion_tokens,
                "completion usage"
            );
        }

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_name_sanitized() {
        assert_eq!(speaker_name("Software Test Engineer").as_deref(), Some("Software_Test_Engineer"));
        assert_eq!(speaker_name("Counselor").as_deref(), Some("Counselor"));
        assert_eq!(speaker_name("  "), None);
    }

    #[test]
    fn test_usage_accumulates() {
        let usage = TokenUsage::default();
        usage.record(10, 5);
        usage.record(1, 1);
        assert_eq!(usage.totals(), (11, 6, 17));
        assert_eq!(usage.requests.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_user_message_carries_name() {
        let message = Message::user("write main.py").from_speaker("Chief Technology Officer");
        match OpenAiClient::convert(&message).unwrap() {
            ChatCompletionRequestMessage::User(user) => {
                assert_eq!(user.name.as_deref(), Some("Chief_Technology_Officer"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
