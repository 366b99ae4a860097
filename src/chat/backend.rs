//! 对话能力：两角色一轮交换
//!
//! 引擎只依赖两个信号：回复是否为最终答案（带 `<INFO>` 标记）与对话是否终止。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::chat::message::Message;
use crate::core::{EngineError, Result};
use crate::llm::LlmClient;

/// 最终答案标记
pub const INFO_MARKER: &str = "<INFO>";
/// 对话终止标记
pub const DONE_MARKER: &str = "<CAMEL_TASK_DONE>";

/// 角色：名字与已填充占位符的系统提示
#[derive(Debug, Clone, Default)]
pub struct RoleSpec {
    pub name: String,
    pub prompt: String,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

/// 一次交换请求
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub phase: &'a str,
    pub assistant: &'a RoleSpec,
    pub user: &'a RoleSpec,
    /// 已有对话（assistant 视角），第一条是 Phase 提示
    pub transcript: &'a [Message],
    pub placeholders: &'a BTreeMap<String, String>,
    /// 只要 assistant 回复，不需要 user 接话
    pub single_turn: bool,
}

impl ChatRequest<'_> {
    pub fn placeholder(&self, key: &str) -> Option<&str> {
        self.placeholders.get(key).map(String::as_str)
    }
}

/// 一次交换的回复
#[derive(Debug, Clone, Default)]
pub struct ChatReply {
    pub assistant: String,
    pub user: Option<String>,
    pub is_final: bool,
    pub terminated: bool,
}

impl ChatReply {
    /// 最终答案所在的文本：优先含标记的一方
    pub fn final_text(&self) -> &str {
        match &self.user {
            Some(user) if !self.assistant.contains(INFO_MARKER) && user.contains(INFO_MARKER) => {
                user
            }
            _ => &self.assistant,
        }
    }
}

/// 外部对话能力
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn step(&self, request: ChatRequest<'_>) -> Result<ChatReply>;

    /// 累计 token：(prompt, completion, total)
    fn usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 基于 LlmClient 的角色扮演实现：两次补全分别代表 assistant 与 user
pub struct RolePlayChat {
    llm: Arc<dyn LlmClient>,
}

impl RolePlayChat {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn is_terminated(text: &str) -> bool {
        text.trim().is_empty() || text.contains(DONE_MARKER)
    }
}

#[async_trait]
impl ChatBackend for RolePlayChat {
    fn usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    async fn step(&self, request: ChatRequest<'_>) -> Result<ChatReply> {
        let mut messages = vec![Message::system(request.assistant.prompt.clone())];
        messages.extend(request.transcript.iter().cloned());
        let assistant = self.llm.complete(&messages).await.map_err(EngineError::Chat)?;
        tracing::debug!(phase = request.phase, role = %request.assistant.name, "assistant replied");

        let mut reply = ChatReply {
            is_final: assistant.contains(INFO_MARKER),
            terminated: Self::is_terminated(&assistant),
            assistant,
            user: None,
        };
        if reply.is_final || reply.terminated || request.single_turn {
            return Ok(reply);
        }

        let mut messages = vec![Message::system(request.user.prompt.clone())];
        messages.extend(request.transcript.iter().map(Message::flipped));
        messages.push(Message::user(reply.assistant.clone()).from_speaker(&request.assistant.name));
        let user = self.llm.complete(&messages).await.map_err(EngineError::Chat)?;
        tracing::debug!(phase = request.phase, role = %request.user.name, "user replied");

        reply.is_final = user.contains(INFO_MARKER);
        reply.terminated = Self::is_terminated(&user);
        reply.user = Some(user);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn roles() -> (RoleSpec, RoleSpec) {
        (
            RoleSpec::new("Programmer", "You write code."),
            RoleSpec::new("Product Owner", "You review code."),
        )
    }

    #[tokio::test]
    async fn test_final_assistant_reply_skips_user() {
        let llm = Arc::new(MockLlmClient::with_responses(["<INFO> Python"]));
        let chat = RolePlayChat::new(llm.clone());
        let (a, u) = roles();
        let transcript = vec![Message::user("Choose a language")];
        let placeholders = BTreeMap::new();
        let reply = chat
            .step(ChatRequest {
                phase: "LanguageChoose",
                assistant: &a,
                user: &u,
                transcript: &transcript,
                placeholders: &placeholders,
                single_turn: false,
            })
            .await
            .unwrap();
        assert!(reply.is_final);
        assert!(reply.user.is_none());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_user_reply_can_be_final() {
        let llm = Arc::new(MockLlmClient::with_responses(["I propose Python", "<INFO> Python"]));
        let chat = RolePlayChat::new(llm);
        let (a, u) = roles();
        let transcript = vec![Message::user("Choose a language")];
        let placeholders = BTreeMap::new();
        let reply = chat
            .step(ChatRequest {
                phase: "LanguageChoose",
                assistant: &a,
                user: &u,
                transcript: &transcript,
                placeholders: &placeholders,
                single_turn: false,
            })
            .await
            .unwrap();
        assert!(reply.is_final);
        assert_eq!(reply.final_text(), "<INFO> Python");
    }

    #[tokio::test]
    async fn test_done_marker_terminates() {
        let llm = Arc::new(MockLlmClient::with_responses(["ok <CAMEL_TASK_DONE>"]));
        let chat = RolePlayChat::new(llm);
        let (a, u) = roles();
        let transcript = vec![Message::user("go")];
        let placeholders = BTreeMap::new();
        let reply = chat
            .step(ChatRequest {
                phase: "Coding",
                assistant: &a,
                user: &u,
                transcript: &transcript,
                placeholders: &placeholders,
                single_turn: false,
            })
            .await
            .unwrap();
        assert!(reply.terminated);
        assert!(!reply.is_final);
    }
}
