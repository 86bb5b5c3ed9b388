//! 协调器：单条消息的完整处理流水线
//!
//! ROUTING → {DIRECT | PREPARING* → SYNTHESIZING} → RECORDING → DONE，任意阶段出错进入 ERROR，
//! 最终仍返回结构良好的 CoordinatorResponse。process 不会返回错误，也不会让 Agent 的 panic 冒出。
//!
//! 一个 Coordinator 对应一个会话；同一实例同一时刻只处理一个请求（&mut self 保证）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::agents::{
    Agent, AgentDescriptor, AgentRegistry, AgentResponse, Context, CONVERSATION_CONTEXT_KEY,
};
use crate::config::{AppConfig, CollaborationSection};
use crate::core::{AgentError, ConfigError, PipelinePhase};
use crate::memory::{ConversationEntry, ConversationStore, MemoryBank};
use crate::orchestration::collaboration::{
    manual_synthesis, merge_tools, needs_collaboration, secondary_agents, synthesis_prompt,
    CollaborationPlan, COORDINATOR_AGENT,
};
use crate::routing::{Router, RoutingDecision, RoutingPatterns};

/// 错误回复的置信度
const ERROR_CONFIDENCE: f64 = 0.1;

/// process 的返回值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorResponse {
    pub content: String,
    pub agent_used: String,
    pub tools_used: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
    pub metadata: Map<String, Value>,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub session_id: String,
    pub active_agents: Vec<String>,
    pub total_messages: u64,
    /// 各 Agent 记忆中的条目总数
    pub memory_usage: usize,
    pub last_activity: Option<DateTime<Utc>>,
    pub agent_usage_stats: std::collections::BTreeMap<String, u64>,
    pub phase: PipelinePhase,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRecommendations {
    pub message: String,
    pub recommended_agent: String,
    /// 每个 Agent 的 combined 得分
    pub agent_scores: std::collections::BTreeMap<String, f64>,
    pub routing_confidence: f64,
}

pub struct Coordinator {
    router: Router,
    collaboration: CollaborationSection,
    memory: MemoryBank,
    store: Arc<dyn ConversationStore>,
    session_id: String,
    prompt_history_entries: usize,
    phase: PipelinePhase,
}

impl Coordinator {
    /// 注册表为空时返回 ConfigError::NoAgents；会话 id 取配置值，否则生成 uuid
    pub fn new(
        cfg: &AppConfig,
        registry: AgentRegistry,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self, ConfigError> {
        let router = Router::new(registry, &cfg.routing)?;
        let session_id = cfg
            .app
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::info!(session = %session_id, "coordinator ready");
        Ok(Self {
            router,
            collaboration: cfg.collaboration.clone(),
            memory: MemoryBank::new(cfg.memory.max_conversation_history),
            store,
            session_id,
            prompt_history_entries: cfg.memory.prompt_history_entries,
            phase: PipelinePhase::Done,
        })
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn memory(&self) -> &MemoryBank {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryBank {
        &mut self.memory
    }

    /// 最近一次请求停在的阶段
    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    pub fn agents(&self) -> Vec<AgentDescriptor> {
        self.router.registry().info()
    }

    pub fn has_agent(&self, name: &str) -> bool {
        self.router.has_agent(name)
    }

    /// 处理一条消息；任何失败（包括 Agent panic）都转为低置信度的错误回复
    pub async fn process(
        &mut self,
        message: &str,
        preferred_agent: Option<&str>,
        context: Option<Context>,
    ) -> CoordinatorResponse {
        let timestamp = Utc::now();
        let preview: String = message.chars().take(100).collect();
        tracing::info!(session = %self.session_id, message = %preview, "processing message");

        let outcome = AssertUnwindSafe(self.run_pipeline(message, preferred_agent, context, timestamp))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(response)) => {
                self.phase = PipelinePhase::Done;
                response
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "message processing failed");
                self.error_response(e.to_string(), timestamp)
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(error = %reason, "agent panicked during processing");
                self.error_response(reason, timestamp)
            }
        }
    }

    /// 显式交给指定 Agent
    pub async fn hand_off(
        &mut self,
        agent_name: &str,
        message: &str,
        context: Option<Context>,
    ) -> CoordinatorResponse {
        tracing::info!(agent = %agent_name, "explicit hand-off");
        self.process(message, Some(agent_name), context).await
    }

    async fn run_pipeline(
        &mut self,
        message: &str,
        preferred_agent: Option<&str>,
        context: Option<Context>,
        timestamp: DateTime<Utc>,
    ) -> Result<CoordinatorResponse, AgentError> {
        self.phase = PipelinePhase::Routing;
        let decision = self.router.route(message, context.as_ref(), preferred_agent);
        let primary = self
            .router
            .registry()
            .get(&decision.agent_name)
            .ok_or_else(|| AgentError::UnknownAgent(decision.agent_name.clone()))?;

        let agent_context = self.agent_context(&decision.agent_name, context);

        let plan = needs_collaboration(&self.collaboration, message).and_then(|trigger| {
            let names = self.router.registry().names();
            let secondary = secondary_agents(
                &self.collaboration,
                message,
                &decision.agent_name,
                names.iter().map(String::as_str),
            );
            if secondary.is_empty() {
                tracing::info!(?trigger, "collaboration triggered but no secondary agents matched");
                return None;
            }
            tracing::info!(?trigger, secondary = ?secondary, "initiating multi-agent collaboration");
            Some(CollaborationPlan::build(
                &self.collaboration,
                message,
                &decision.agent_name,
                secondary,
            ))
        });
        let collaboration_used = plan.is_some();

        let response = match plan {
            Some(plan) => self.collaborate(message, &plan, primary, &agent_context).await,
            None => {
                self.phase = PipelinePhase::Direct;
                match primary.handle(message, Some(&agent_context)).await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(agent = %primary.name(), error = %e, "agent handler failed");
                        AgentResponse::degraded(primary.name(), &e)
                    }
                }
            }
        };

        self.phase = PipelinePhase::Recording;
        self.record(message, &response, &decision, collaboration_used, timestamp)
            .await;

        Ok(self.build_response(response, &decision, collaboration_used, timestamp))
    }

    /// 调用方上下文 + 该 Agent 的对话摘要（调用方已提供时不覆盖）
    fn agent_context(&self, agent: &str, context: Option<Context>) -> Context {
        let mut ctx = context.unwrap_or_default();
        if !ctx.contains_key(CONVERSATION_CONTEXT_KEY) {
            if let Some(memory) = self.memory.get(agent) {
                let history = memory.context_for_prompt(self.prompt_history_entries);
                if !history.is_empty() {
                    ctx.insert(CONVERSATION_CONTEXT_KEY.to_string(), Value::String(history));
                }
            }
        }
        ctx
    }

    /// 顺序执行准备步骤，失败的步骤跳过；主 Agent 综合失败时手动拼接
    async fn collaborate(
        &mut self,
        message: &str,
        plan: &CollaborationPlan,
        primary: Arc<dyn Agent>,
        context: &Context,
    ) -> AgentResponse {
        let mut results: Vec<(String, AgentResponse)> = Vec::new();

        for step in &plan.preparation {
            self.phase = PipelinePhase::Preparing;
            let Some(agent) = self.router.registry().get(&step.agent) else {
                tracing::warn!(agent = %step.agent, "collaboration agent not registered, skipping step");
                continue;
            };
            match guarded_handle(agent.as_ref(), &step.task_text, context).await {
                Ok(result) => {
                    tracing::info!(agent = %step.agent, order = step.order, "completed collaboration step");
                    results.push((step.agent.clone(), result));
                }
                Err(e) => {
                    tracing::warn!(agent = %step.agent, error = %e, "collaboration step failed, skipping");
                }
            }
        }

        self.phase = PipelinePhase::Synthesizing;
        let prompt = synthesis_prompt(message, &plan.synthesis.task_text, &results);
        match guarded_handle(primary.as_ref(), &prompt, context).await {
            Ok(mut synthesized) => {
                let agents_involved: Vec<&str> = results.iter().map(|(a, _)| a.as_str()).collect();
                synthesized.tools_used = merge_tools(
                    results
                        .iter()
                        .map(|(_, r)| r.tools_used.as_slice())
                        .chain(std::iter::once(synthesized.tools_used.as_slice())),
                );
                synthesized
                    .metadata
                    .insert("collaboration_synthesis".to_string(), Value::Bool(true));
                synthesized
                    .metadata
                    .insert("agents_involved".to_string(), json!(agents_involved));
                synthesized
            }
            Err(e) => {
                tracing::warn!(agent = %primary.name(), error = %e, "synthesis failed, combining results manually");
                manual_synthesis(&results, self.collaboration.manual_synthesis_confidence)
            }
        }
    }

    /// 写入对应 Agent 的记忆并持久化；持久化失败只记录日志
    async fn record(
        &mut self,
        message: &str,
        response: &AgentResponse,
        decision: &RoutingDecision,
        collaboration_used: bool,
        timestamp: DateTime<Utc>,
    ) {
        let context_type = if collaboration_used {
            "collaboration"
        } else {
            "conversation"
        };
        self.memory.get_or_create(&response.agent_name).record(
            message,
            &response.content,
            Some(context_type),
            None,
        );

        let entry = ConversationEntry {
            session_id: self.session_id.clone(),
            timestamp,
            user_message: message.to_string(),
            agent_response: response.content.clone(),
            agent_used: response.agent_name.clone(),
            tools_used: response.tools_used.iter().cloned().collect(),
            confidence: response.confidence,
            routing_confidence: decision.confidence,
            metadata: response.metadata.clone(),
        };
        if let Err(e) = self.store.persist(&entry).await {
            tracing::warn!(session = %self.session_id, error = %e, "failed to persist conversation");
        }
    }

    fn build_response(
        &self,
        response: AgentResponse,
        decision: &RoutingDecision,
        collaboration_used: bool,
        timestamp: DateTime<Utc>,
    ) -> CoordinatorResponse {
        let mut metadata = response.metadata;
        metadata.insert(
            "routing_decision".to_string(),
            json!({
                "selected_agent": decision.agent_name,
                "confidence": decision.confidence,
                "alternatives": decision.alternatives,
            }),
        );
        metadata.insert("collaboration_used".to_string(), Value::Bool(collaboration_used));
        metadata.insert("session_id".to_string(), Value::String(self.session_id.clone()));

        CoordinatorResponse {
            content: response.content,
            agent_used: response.agent_name,
            tools_used: response.tools_used,
            confidence: response.confidence,
            reasoning: response
                .reasoning
                .unwrap_or_else(|| decision.reasoning.clone()),
            metadata,
            session_id: self.session_id.clone(),
            timestamp,
        }
    }

    fn error_response(&mut self, reason: String, timestamp: DateTime<Utc>) -> CoordinatorResponse {
        self.phase = PipelinePhase::Error;
        let mut metadata = Map::new();
        metadata.insert("error".to_string(), Value::String(reason.clone()));
        CoordinatorResponse {
            content: format!(
                "I apologize, but I encountered an error while processing your request: {reason}"
            ),
            agent_used: COORDINATOR_AGENT.to_string(),
            tools_used: Vec::new(),
            confidence: ERROR_CONFIDENCE,
            reasoning: "Error during message processing".to_string(),
            metadata,
            session_id: self.session_id.clone(),
            timestamp,
        }
    }

    /// 本会话最近的持久化记录（按时间正序）；读取失败时返回空
    pub async fn history(&self, limit: usize) -> Vec<ConversationEntry> {
        match self.store.recent(&self.session_id, limit).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(session = %self.session_id, error = %e, "failed to read history");
                Vec::new()
            }
        }
    }

    /// 清空本会话的持久化记录与所有 Agent 记忆
    pub async fn clear_history(&mut self) {
        if let Err(e) = self.store.clear_session(&self.session_id).await {
            tracing::warn!(session = %self.session_id, error = %e, "failed to clear session");
        }
        self.memory.clear_all();
        tracing::info!(session = %self.session_id, "history cleared");
    }

    pub async fn system_status(&self) -> SystemStatus {
        let memory_usage: usize = self
            .memory
            .agents()
            .filter_map(|a| self.memory.get(a))
            .map(|m| m.len())
            .sum();
        let (stats, error) = match self.store.statistics(&self.session_id).await {
            Ok(stats) => (Some(stats), None),
            Err(e) => {
                tracing::warn!(session = %self.session_id, error = %e, "failed to read statistics");
                (None, Some(e.to_string()))
            }
        };

        SystemStatus {
            session_id: self.session_id.clone(),
            active_agents: self.router.registry().names(),
            total_messages: stats.as_ref().map(|s| s.total_messages).unwrap_or(0),
            memory_usage,
            last_activity: stats.as_ref().and_then(|s| s.last_message),
            agent_usage_stats: stats.map(|s| s.agent_usage).unwrap_or_default(),
            phase: self.phase,
            error,
        }
    }

    pub fn recommendations(&self, message: &str) -> AgentRecommendations {
        let explanation = self.router.explain(message);
        let agent_scores: std::collections::BTreeMap<String, f64> = explanation
            .scores
            .iter()
            .map(|(name, detail)| (name.clone(), detail.combined))
            .collect();
        let routing_confidence = agent_scores.values().copied().fold(0.0, f64::max);
        AgentRecommendations {
            message: explanation.message,
            recommended_agent: explanation.recommended_agent,
            agent_scores,
            routing_confidence,
        }
    }

    /// 基于最近 limit 条持久化记录的路由统计
    pub async fn routing_patterns(&self, limit: usize) -> Option<RoutingPatterns> {
        let history = self.history(limit).await;
        self.router
            .analyze_patterns(history.iter().map(|e| e.agent_used.as_str()))
    }
}

/// 协作步骤内的 panic 转为 AgentError，只影响该步骤
async fn guarded_handle(
    agent: &dyn Agent,
    message: &str,
    context: &Context,
) -> Result<AgentResponse, AgentError> {
    match AssertUnwindSafe(agent.handle(message, Some(context)))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(AgentError::Handler(format!(
            "{} panicked: {}",
            agent.name(),
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "agent panicked".to_string()
    }
}
