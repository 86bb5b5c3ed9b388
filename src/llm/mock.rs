//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 回显最后一条 User 消息的前 200 个字符，输出可预测。

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let preview: String = last_user.chars().take(200).collect();
        Ok(format!("Mock response to: {}", preview))
    }
}

/// 总是失败的客户端，用于演练降级路径
#[derive(Debug, Default)]
pub struct FailingLlmClient;

#[async_trait]
impl LlmClient for FailingLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        Err("LLM backend unavailable".to_string())
    }
}
