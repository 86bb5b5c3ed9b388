//! LLM 层：客户端抽象与实现（OpenAI 兼容 / OpenRouter / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use message::{Message, Role};
pub use mock::{FailingLlmClient, MockLlmClient};
pub use openai::{create_openrouter_client, OpenAiClient, TokenUsage, OPENROUTER_BASE_URL};
pub use traits::LlmClient;

/// 根据配置与环境变量选择 LLM 后端（OpenRouter / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.timeouts.request;
    let use_openrouter = provider == "openrouter" && std::env::var("OPENROUTER_API_KEY").is_ok();
    let use_openai = provider == "openai" && std::env::var("OPENAI_API_KEY").is_ok();

    if use_openrouter {
        tracing::info!("Using OpenRouter LLM ({})", cfg.llm.model);
        Arc::new(create_openrouter_client(Some(&cfg.llm.model)).with_request_timeout(timeout))
    } else if use_openai {
        let base = cfg.llm.base_url.as_deref();
        tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
        Arc::new(
            OpenAiClient::new(
                base,
                &cfg.llm.model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            )
            .with_request_timeout(timeout),
        )
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}
