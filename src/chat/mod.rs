//! 对话层：消息、两角色交换能力及其实现（LLM 角色扮演 / 脚本化）

pub mod backend;
pub mod message;
pub mod scripted;

pub use backend::{
    ChatBackend, ChatReply, ChatRequest, RolePlayChat, RoleSpec, DONE_MARKER, INFO_MARKER,
};
pub use message::{render_transcript, Message, Role};
pub use scripted::ScriptedChat;
