//! Agent 注册表
//!
//! 按注册顺序保存 Agent（路由打分同分时以注册顺序为准），名称唯一：重复注册会替换旧条目。

use std::sync::Arc;

use crate::agents::{Agent, AgentDescriptor, AgentKind, SpecialistAgent};
use crate::llm::LlmClient;
use crate::tools::ToolExecutor;

#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        match self.agents.iter().position(|a| a.name() == agent.name()) {
            Some(idx) => {
                tracing::warn!(agent = %agent.name(), "replacing registered agent");
                self.agents[idx] = agent;
            }
            None => self.agents.push(agent),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.iter().any(|a| a.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Agent>> {
        self.agents.iter()
    }

    pub fn first(&self) -> Option<Arc<dyn Agent>> {
        self.agents.first().cloned()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// 所有已注册 Agent 的描述
    pub fn info(&self) -> Vec<AgentDescriptor> {
        self.agents.iter().map(|a| a.descriptor().clone()).collect()
    }
}

/// 注册四个内置专家 Agent，共享同一个 LLM 客户端与工具执行器
pub fn build_default_registry(llm: Arc<dyn LlmClient>, tools: Option<ToolExecutor>) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for kind in AgentKind::ALL {
        let mut agent = SpecialistAgent::new(kind, llm.clone());
        if let Some(executor) = &tools {
            agent = agent.with_tools(executor.clone());
        }
        registry.register(Arc::new(agent));
    }
    tracing::info!(agents = ?registry.names(), "agent registry ready");
    registry
}
