//! 错误类型：Agent 调用、持久化存储、配置
//!
//! 编排层对外永不抛错（见 Coordinator::process），这里的错误只在内部传递，
//! 最终被降级为低置信度回复或记录日志后丢弃。

use thiserror::Error;

/// Agent 评分 / 处理 / 工具调用过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Scoring failed: {0}")]
    Scoring(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Agent {0} not available")]
    UnknownAgent(String),

    #[error("Handler error: {0}")]
    Handler(String),
}

/// 持久化层错误（SQLite 索引 / 会话日志文件）
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Blocking task failed: {0}")]
    Join(String),

    #[error("Invalid timestamp: {0}")]
    Timestamp(String),

    /// persist 中部分步骤失败（其余步骤已尽力完成）
    #[error("Partial write: {}", .0.join("; "))]
    Partial(Vec<String>),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// 启动期配置错误（属于致命错误，不在单条消息处理范围内）
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No agents registered")]
    NoAgents,

    #[error("Config load error: {0}")]
    Load(#[from] config::ConfigError),
}
