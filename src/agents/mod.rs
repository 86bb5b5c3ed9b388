//! Agent 层：能力评分 + 处理的统一契约
//!
//! 编排层只通过 Agent trait 与具体 Agent 交互：
//! - `score`：纯计算的自评分，返回 [0,1]；出错时由 Router 记为 0.0
//! - `handle`：异步处理，返回结构化结果；出错时由 Coordinator 降级为低置信度回复
//!
//! 内置 Agent 是封闭集合 [`AgentKind`]，新增一种 Agent = 新增一个变体 + 注册表条目。

pub mod registry;
pub mod specialist;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;

pub use registry::{build_default_registry, AgentRegistry};
pub use specialist::SpecialistAgent;

/// 请求上下文（调用方透传的键值，如 conversation_context）
pub type Context = Map<String, Value>;

/// 上下文中携带对话摘要的键
pub const CONVERSATION_CONTEXT_KEY: &str = "conversation_context";

/// 低置信度回复使用的置信度
pub const DEGRADED_CONFIDENCE: f64 = 0.1;

/// Agent 描述：注册后不可变
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub capability_tags: BTreeSet<String>,
    pub keyword_tags: BTreeSet<String>,
}

impl AgentDescriptor {
    pub fn new<I, J, S, T>(name: impl Into<String>, capability_tags: I, keyword_tags: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            capability_tags: capability_tags.into_iter().map(Into::into).collect(),
            keyword_tags: keyword_tags.into_iter().map(Into::into).collect(),
        }
    }
}

/// 一次 handle 的结构化结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub agent_name: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
    pub confidence: f64,
    pub reasoning: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentResponse {
    pub fn new(agent_name: impl Into<String>, content: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            agent_name: agent_name.into(),
            tools_used: Vec::new(),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: None,
            metadata: Map::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools_used = tools;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// handle 失败时的降级回复：携带错误文本，置信度 0.1
    pub fn degraded(agent_name: &str, err: &AgentError) -> Self {
        Self::new(
            agent_name,
            format!("I apologize, but I encountered an error while processing your request: {err}"),
            DEGRADED_CONFIDENCE,
        )
        .with_reasoning(format!("Error occurred in {agent_name} agent"))
        .with_metadata("error", Value::String(err.to_string()))
    }
}

/// Agent 契约
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// 自评分，[0,1]
    fn score(&self, message: &str, context: Option<&Context>) -> Result<f64, AgentError>;

    async fn handle(
        &self,
        message: &str,
        context: Option<&Context>,
    ) -> Result<AgentResponse, AgentError>;
}

/// 内置 Agent 种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Research,
    Code,
    Creative,
    Task,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Research,
        AgentKind::Code,
        AgentKind::Creative,
        AgentKind::Task,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Research => "research",
            AgentKind::Code => "code",
            AgentKind::Creative => "creative",
            AgentKind::Task => "task",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    pub fn capability_tags(&self) -> &'static [&'static str] {
        match self {
            AgentKind::Research => &["web_search", "data_analysis", "fact_checking", "research"],
            AgentKind::Code => &["code_generation", "debugging", "code_review", "architecture"],
            AgentKind::Creative => &["content_creation", "brainstorming", "storytelling", "design"],
            AgentKind::Task => &["project_management", "planning", "coordination", "optimization"],
        }
    }

    /// 该种类可以使用的工具名
    pub fn tool_names(&self) -> &'static [&'static str] {
        match self {
            AgentKind::Research => &["web_search", "file_ops"],
            AgentKind::Code => &["code_exec", "file_ops"],
            AgentKind::Creative | AgentKind::Task => &["file_ops"],
        }
    }

    /// 成功处理时报告的置信度
    pub fn default_confidence(&self) -> f64 {
        match self {
            AgentKind::Research => 0.8,
            AgentKind::Code => 0.9,
            AgentKind::Creative => 0.85,
            AgentKind::Task => 0.9,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            AgentKind::Research => {
                "You are a Research Agent, an expert researcher and analyst. \
                 Your personality is analytical, thorough, and fact-focused. \
                 Find and verify factual information, analyze data and trends, and break complex topics \
                 into understandable parts. Cite sources when possible and acknowledge uncertainty."
            }
            AgentKind::Code => {
                "You are a Code Agent, an expert software engineer and programmer. \
                 Your personality is precise, logical, and solution-oriented. \
                 Write clean, efficient, well-documented code, debug issues, review and optimize code, \
                 and design software architecture. Always provide working examples and explain your reasoning."
            }
            AgentKind::Creative => {
                "You are a Creative Agent, an expert in creative thinking and content creation. \
                 Your personality is imaginative, expressive, and inspiring. \
                 Generate ideas and concepts, write engaging content and stories, and help overcome \
                 creative blocks. Be bold and think outside the box."
            }
            AgentKind::Task => {
                "You are a Task Agent, an expert project manager and coordinator. \
                 Your personality is organized, efficient, and goal-oriented. \
                 Break complex projects into manageable tasks, create plans and timelines, and optimize \
                 workflows. Always provide clear, actionable steps."
            }
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
