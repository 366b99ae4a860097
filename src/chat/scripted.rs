//! 脚本化对话后端（测试与离线演练用）
//!
//! 按 Phase 名排队预设回复；队列为空时返回 fallback。可按 `current_file_name`
//! 占位符为某个文件注入延迟，用来模拟扇出中的慢任务。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::chat::backend::{ChatBackend, ChatReply, ChatRequest, INFO_MARKER};
use crate::core::Result;

#[derive(Default)]
pub struct ScriptedChat {
    scripts: Mutex<HashMap<String, VecDeque<ChatReply>>>,
    fallback: String,
    file_delays: HashMap<String, Duration>,
    log: Mutex<Vec<String>>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// 队列为空时所有 Phase 收到的回复
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = text.into();
        self
    }

    /// 预设 assistant 回复；是否为最终答案按 `<INFO>` 标记判断
    pub fn reply(self, phase: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        let reply = ChatReply {
            is_final: text.contains(INFO_MARKER),
            terminated: false,
            assistant: text,
            user: None,
        };
        self.turn(phase, reply)
    }

    pub fn turn(self, phase: &str, reply: ChatReply) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(phase.to_string()).or_default().push_back(reply);
        }
        self
    }

    pub fn delay_for_file(mut self, file: &str, delay: Duration) -> Self {
        self.file_delays.insert(file.to_string(), delay);
        self
    }

    /// 调用记录：`<phase>` 或 `<phase>:<current_file_name>`，完成时追加 `done:` 前缀的一条
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, entry: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(entry);
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn step(&self, request: ChatRequest<'_>) -> Result<ChatReply> {
        let label = match request.placeholder("current_file_name") {
            Some(file) => format!("{}:{}", request.phase, file),
            None => request.phase.to_string(),
        };
        self.record(label.clone());

        if let Some(delay) = request
            .placeholder("current_file_name")
            .and_then(|f| self.file_delays.get(f))
        {
            tokio::time::sleep(*delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(request.phase).and_then(VecDeque::pop_front));
        let reply = scripted.unwrap_or_else(|| ChatReply {
            assistant: self.fallback.clone(),
            is_final: self.fallback.contains(INFO_MARKER),
            ..Default::default()
        });
        self.record(format!("done:{label}"));
        Ok(reply)
    }
}
