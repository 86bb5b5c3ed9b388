//! 多 Agent 协作：触发判断、协作计划、结果综合
//!
//! 协作是一个布尔门（命中任一触发条件即可），不是评分。计划由若干准备步骤
//! （每个次要 Agent 一步，任务文本来自模板）加上一个由主 Agent 执行的综合步骤组成，
//! 按 order 严格顺序执行。

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::agents::AgentResponse;
use crate::config::CollaborationSection;

/// 综合步骤的任务模板
pub const SYNTHESIS_TEMPLATE: &str =
    "Synthesize information and provide comprehensive response to: {message}";

/// 没有为某个 Agent 配置模板时使用
const DEFAULT_TEMPLATE: &str = "Provide supporting analysis for: {message}";

/// 手动综合时 agent_used 的取值
pub const COORDINATOR_AGENT: &str = "coordinator";

/// 触发协作的原因
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollaborationTrigger {
    /// 命中固定的跨领域短语
    Phrase { phrase: String },
    /// 命中的领域关键词数
    MultiDomain { hits: usize },
    /// 词数超过阈值
    LongMessage { words: usize },
}

pub fn needs_collaboration(cfg: &CollaborationSection, message: &str) -> Option<CollaborationTrigger> {
    let lower = message.to_lowercase();

    if let Some(phrase) = cfg.phrases.iter().find(|p| lower.contains(p.to_lowercase().as_str())) {
        return Some(CollaborationTrigger::Phrase {
            phrase: phrase.clone(),
        });
    }

    let hits = cfg
        .domain_keywords
        .iter()
        .filter(|k| lower.contains(k.to_lowercase().as_str()))
        .count();
    if hits >= cfg.min_domain_hits {
        return Some(CollaborationTrigger::MultiDomain { hits });
    }

    let words = message.split_whitespace().count();
    if words > cfg.word_threshold {
        return Some(CollaborationTrigger::LongMessage { words });
    }

    None
}

/// 按候选顺序挑选关键词命中的次要 Agent（排除主 Agent），最多 max_secondary 个
pub fn secondary_agents<'a, I>(
    cfg: &CollaborationSection,
    message: &str,
    primary: &str,
    candidates: I,
) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let lower = message.to_lowercase();
    candidates
        .into_iter()
        .filter(|name| *name != primary)
        .filter(|name| {
            cfg.secondary_keywords
                .get(*name)
                .map(|words| words.iter().any(|w| lower.contains(w.to_lowercase().as_str())))
                .unwrap_or(false)
        })
        .take(cfg.max_secondary)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub agent: String,
    pub task_text: String,
    /// 从 1 开始的全序
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollaborationPlan {
    pub primary_agent: String,
    pub secondary_agents: Vec<String>,
    pub preparation: Vec<PlanStep>,
    pub synthesis: PlanStep,
}

impl CollaborationPlan {
    pub fn build(
        cfg: &CollaborationSection,
        message: &str,
        primary: &str,
        secondary_agents: Vec<String>,
    ) -> Self {
        let preparation: Vec<PlanStep> = secondary_agents
            .iter()
            .enumerate()
            .map(|(i, agent)| {
                let template = cfg
                    .templates
                    .get(agent)
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_TEMPLATE);
                PlanStep {
                    agent: agent.clone(),
                    task_text: template.replace("{message}", message),
                    order: i + 1,
                }
            })
            .collect();

        let synthesis = PlanStep {
            agent: primary.to_string(),
            task_text: SYNTHESIS_TEMPLATE.replace("{message}", message),
            order: preparation.len() + 1,
        };

        Self {
            primary_agent: primary.to_string(),
            secondary_agents,
            preparation,
            synthesis,
        }
    }

    /// 全部步骤，按执行顺序
    pub fn steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.preparation.iter().chain(std::iter::once(&self.synthesis))
    }
}

/// 综合提示词：原始请求 + 各次要 Agent 的结果（content / tools_used / confidence）
pub fn synthesis_prompt(original: &str, task_text: &str, results: &[(String, AgentResponse)]) -> String {
    let mut gathered = Map::new();
    for (agent, result) in results {
        gathered.insert(
            agent.clone(),
            json!({
                "content": result.content,
                "tools_used": result.tools_used,
                "confidence": result.confidence,
            }),
        );
    }
    let gathered = serde_json::to_string_pretty(&Value::Object(gathered))
        .unwrap_or_else(|_| "{}".to_string());

    format!(
        "{task_text}\n\n\
         Original request: \"{original}\"\n\n\
         I've gathered information from multiple specialized agents:\n\n\
         {gathered}\n\n\
         Please provide a comprehensive, well-integrated response that synthesizes all this information \
         to fully address the original request. Ensure the response is coherent, complete, and \
         acknowledges the contributions from different perspectives."
    )
}

/// 各步骤工具的并集（去重）
pub fn merge_tools<'a, I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a [String]>,
{
    lists
        .into_iter()
        .flat_map(|l| l.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 综合失败时的手动拼接：每个次要 Agent 的原始内容放在带标题的小节下
pub fn manual_synthesis(results: &[(String, AgentResponse)], confidence: f64) -> AgentResponse {
    let mut content = String::from("Based on analysis from multiple agents:\n\n");
    if results.is_empty() {
        content.push_str("No supporting agent produced a result for this request.\n");
    }
    for (agent, result) in results {
        content.push_str(&format!(
            "**{} Agent Insights:**\n{}\n\n",
            title_case(agent),
            result.content
        ));
    }

    let agents_involved: Vec<&str> = results.iter().map(|(a, _)| a.as_str()).collect();
    AgentResponse::new(COORDINATOR_AGENT, content, confidence)
        .with_tools(merge_tools(results.iter().map(|(_, r)| r.tools_used.as_slice())))
        .with_reasoning("Multi-agent collaboration with manual synthesis")
        .with_metadata("collaboration_synthesis", Value::Bool(true))
        .with_metadata("agents_involved", json!(agents_involved))
}
