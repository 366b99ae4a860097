//! LLM 客户端抽象
//!
//! 角色扮演对话（[`crate::chat::RolePlayChat`]）通过该 trait 调用任意后端。

use async_trait::async_trait;

use crate::chat::Message;

/// LLM 客户端 trait：非流式补全
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 累计 token 使用：(prompt, completion, total)；默认 (0, 0, 0)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
