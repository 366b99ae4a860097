//! 对话消息与记录
//!
//! 角色是相对 assistant 一方而言的：User 为提出需求的一方，Assistant 为执行的一方。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息；speaker 为发言的角色名（如 "Programmer"）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub speaker: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            speaker: String::new(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            speaker: String::new(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            speaker: String::new(),
            content: content.into(),
        }
    }

    pub fn from_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = speaker.into();
        self
    }

    /// 以对方视角看这条消息（user / assistant 互换）
    pub fn flipped(&self) -> Self {
        let role = match self.role {
            Role::User => Role::Assistant,
            Role::Assistant => Role::User,
            Role::System => Role::System,
        };
        Self {
            role,
            speaker: self.speaker.clone(),
            content: self.content.clone(),
        }
    }
}

/// 把整段对话渲染为 "speaker: content" 文本（反思子对话的输入）
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            if m.speaker.is_empty() {
                m.content.clone()
            } else {
                format!("{}: {}", m.speaker, m.content)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
