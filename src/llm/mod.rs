//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::{speaker_name, OpenAiClient, TokenUsage};
pub use traits::LlmClient;

use std::sync::Arc;

use crate::config::LlmSection;

/// 根据 [llm] 配置选择后端：`provider = "mock"` 或没有任何 API Key 时使用 Mock
pub fn create_client(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let api_key = cfg
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    if cfg.provider.eq_ignore_ascii_case("mock") {
        tracing::info!("Using Mock LLM");
        return Arc::new(MockLlmClient::default());
    }
    match api_key {
        Some(key) => {
            tracing::info!(model = %cfg.model, provider = %cfg.provider, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::from_section(cfg, &key))
        }
        None => {
            tracing::warn!("No API key set, using Mock LLM");
            Arc::new(MockLlmClient::default())
        }
    }
}
