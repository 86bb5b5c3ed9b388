//! Conductor - Rust 多智能体编排层
//!
//! 模块划分：
//! - **agents**: Agent 契约、四个专职 Agent 与注册表
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与流水线阶段
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 每个 Agent 的有界对话记忆、SQLite + JSON 双路持久化
//! - **orchestration**: 协作触发、协作计划与协调器
//! - **routing**: 能力评分 × 关键词表的路由与回退
//! - **tools**: 工具契约、注册表与带超时的执行器

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod orchestration;
pub mod routing;
pub mod tools;

pub use orchestration::{Coordinator, CoordinatorResponse};
