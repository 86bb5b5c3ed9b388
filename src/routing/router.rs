//! 路由决策
//!
//! combined = agent_weight × agent.score + keyword_weight × keyword_score，取最高者；
//! 最高分低于 confidence_floor 时使用确定性的语言线索回退。
//! 评分失败的 Agent 记 0 分，route 本身永不失败。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::agents::{Agent, AgentRegistry, Context};
use crate::config::{FallbackSection, RoutingSection};
use crate::core::ConfigError;
use crate::routing::KeywordTable;

/// 一次路由的结果（不持久化）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub agent_name: String,
    pub confidence: f64,
    pub reasoning: String,
    /// 次优 Agent，按得分降序
    pub alternatives: Vec<(String, f64)>,
}

/// 单个 Agent 的评分明细
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentScoreDetail {
    pub agent_score: f64,
    pub keyword_score: f64,
    pub combined: f64,
    pub capabilities: Vec<String>,
    pub matched_keywords: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingExplanation {
    pub message: String,
    pub table_version: u32,
    pub scores: BTreeMap<String, AgentScoreDetail>,
    pub recommended_agent: String,
}

/// 历史路由统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingPatterns {
    pub total_messages: usize,
    pub agent_usage: BTreeMap<String, usize>,
    pub usage_percentages: BTreeMap<String, f64>,
    pub most_used_agent: Option<String>,
    pub least_used_agent: Option<String>,
    /// 用到的 Agent 数 / 注册 Agent 数 × 100
    pub routing_diversity: f64,
}

pub struct Router {
    registry: AgentRegistry,
    keywords: KeywordTable,
    config: RoutingSection,
}

impl Router {
    /// 注册表为空属于配置错误
    pub fn new(registry: AgentRegistry, config: &RoutingSection) -> Result<Self, ConfigError> {
        if registry.is_empty() {
            return Err(ConfigError::NoAgents);
        }
        Ok(Self {
            registry,
            keywords: KeywordTable::from_config(&config.keywords),
            config: config.clone(),
        })
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn has_agent(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn route(
        &self,
        message: &str,
        context: Option<&Context>,
        preferred_agent: Option<&str>,
    ) -> RoutingDecision {
        if let Some(name) = preferred_agent.filter(|n| self.registry.contains(n)) {
            return RoutingDecision {
                agent_name: name.to_string(),
                confidence: 1.0,
                reasoning: "explicit request".to_string(),
                alternatives: Vec::new(),
            };
        }

        let ranked = self.ranked(message, context);
        let alternatives: Vec<(String, f64)> = ranked
            .iter()
            .skip(1)
            .take(self.config.alternatives)
            .filter(|(_, s)| *s > self.config.confidence_floor)
            .cloned()
            .collect();

        let decision = match ranked.first() {
            Some((name, score)) if *score >= self.config.confidence_floor => RoutingDecision {
                agent_name: name.clone(),
                confidence: score.clamp(0.0, 1.0),
                reasoning: format!("Selected based on highest confidence score: {score:.2}"),
                alternatives,
            },
            _ => {
                let name = self.fallback(message);
                RoutingDecision {
                    reasoning: format!(
                        "No agent showed strong confidence, using fallback: {name}"
                    ),
                    agent_name: name,
                    confidence: self.config.fallback_confidence.clamp(0.0, 1.0),
                    alternatives,
                }
            }
        };

        tracing::info!(
            agent = %decision.agent_name,
            confidence = decision.confidence,
            "routed message"
        );
        decision
    }

    /// 按 combined 降序（同分保持注册顺序）
    fn ranked(&self, message: &str, context: Option<&Context>) -> Vec<(String, f64)> {
        let lower = message.to_lowercase();
        let mut ranked: Vec<(String, f64)> = self
            .registry
            .iter()
            .map(|agent| {
                let (agent_score, _) = self.safe_score(agent.as_ref(), message, context);
                let keyword_score = self.keywords.score(agent.name(), &lower);
                let combined = self.config.agent_weight * agent_score
                    + self.config.keyword_weight * keyword_score;
                (agent.name().to_string(), combined)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// 评分失败或越界（含 NaN）时记 0
    fn safe_score(
        &self,
        agent: &dyn Agent,
        message: &str,
        context: Option<&Context>,
    ) -> (f64, Option<String>) {
        match agent.score(message, context) {
            Ok(s) if s.is_finite() => (s.clamp(0.0, 1.0), None),
            Ok(s) => {
                tracing::warn!(agent = %agent.name(), score = s, "non-finite score treated as 0");
                (0.0, Some(format!("non-finite score: {s}")))
            }
            Err(e) => {
                tracing::warn!(agent = %agent.name(), error = %e, "scoring failed");
                (0.0, Some(e.to_string()))
            }
        }
    }

    /// 确定性回退：疑问词 → research，创作动词 → creative，组织动词 → task，否则默认 Agent。
    /// 目标未注册时退到第一个注册的 Agent
    pub fn fallback(&self, message: &str) -> String {
        let lower = message.to_lowercase();
        let FallbackSection {
            question_cues,
            question_agent,
            creation_cues,
            creation_agent,
            organize_cues,
            organize_agent,
            default_agent,
        } = &self.config.fallback;

        let target = if has_cue(&lower, question_cues) {
            question_agent
        } else if has_cue(&lower, creation_cues) {
            creation_agent
        } else if has_cue(&lower, organize_cues) {
            organize_agent
        } else {
            default_agent
        };

        if self.registry.contains(target) {
            target.clone()
        } else {
            self.registry.names().into_iter().next().unwrap_or_default()
        }
    }

    /// 每个 Agent 的评分明细与推荐结果
    pub fn explain(&self, message: &str) -> RoutingExplanation {
        let lower = message.to_lowercase();
        let scores: BTreeMap<String, AgentScoreDetail> = self
            .registry
            .iter()
            .map(|agent| {
                let (agent_score, error) = self.safe_score(agent.as_ref(), message, None);
                let keyword_score = self.keywords.score(agent.name(), &lower);
                let detail = AgentScoreDetail {
                    agent_score,
                    keyword_score,
                    combined: self.config.agent_weight * agent_score
                        + self.config.keyword_weight * keyword_score,
                    capabilities: agent.descriptor().capability_tags.iter().cloned().collect(),
                    matched_keywords: self.keywords.matches(agent.name(), message),
                    error,
                };
                (agent.name().to_string(), detail)
            })
            .collect();

        RoutingExplanation {
            message: message.to_string(),
            table_version: self.keywords.version(),
            scores,
            recommended_agent: self.route(message, None, None).agent_name,
        }
    }

    /// 用户反馈"错了"时建议改派：得分 > 0.3 的其他候选优先，否则取不同于当前的回退 Agent
    pub fn suggest_reroute(
        &self,
        message: &str,
        current_agent: &str,
        feedback: &str,
    ) -> Option<String> {
        let feedback = feedback.to_lowercase();
        if !(feedback.contains("wrong") || feedback.contains("incorrect")) {
            return None;
        }

        let decision = self.route(message, None, None);
        let candidates = std::iter::once((decision.agent_name.clone(), decision.confidence))
            .chain(decision.alternatives);
        for (name, score) in candidates {
            if name != current_agent && score > 0.3 {
                return Some(name);
            }
        }

        let fallback = self.fallback(message);
        (fallback != current_agent).then_some(fallback)
    }

    /// 统计历史中各 Agent 的使用情况
    pub fn analyze_patterns<'a, I>(&self, agents_used: I) -> Option<RoutingPatterns>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut agent_usage: BTreeMap<String, usize> = BTreeMap::new();
        for name in agents_used {
            *agent_usage.entry(name.to_string()).or_default() += 1;
        }
        let total: usize = agent_usage.values().sum();
        if total == 0 {
            return None;
        }

        let usage_percentages = agent_usage
            .iter()
            .map(|(k, v)| (k.clone(), *v as f64 / total as f64 * 100.0))
            .collect();
        let most_used_agent = agent_usage
            .iter()
            .max_by_key(|(_, v)| **v)
            .map(|(k, _)| k.clone());
        let least_used_agent = agent_usage
            .iter()
            .min_by_key(|(_, v)| **v)
            .map(|(k, _)| k.clone());

        Some(RoutingPatterns {
            total_messages: total,
            routing_diversity: agent_usage.len() as f64 / self.registry.len() as f64 * 100.0,
            agent_usage,
            usage_percentages,
            most_used_agent,
            least_used_agent,
        })
    }
}

fn has_cue(lower: &str, cues: &[String]) -> bool {
    cues.iter().any(|c| lower.contains(c.to_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{build_default_registry, AgentDescriptor, AgentResponse};
    use crate::core::AgentError;
    use crate::llm::MockLlmClient;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// 固定分数的 Agent；score 为 None 时评分报错
    struct FixedAgent {
        descriptor: AgentDescriptor,
        score: Option<f64>,
    }

    impl FixedAgent {
        fn new(name: &str, score: Option<f64>) -> Arc<dyn Agent> {
            Arc::new(Self {
                descriptor: AgentDescriptor::new(name, Vec::<String>::new(), Vec::<String>::new()),
                score,
            })
        }
    }

    #[async_trait]
    impl Agent for FixedAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.descriptor
        }

        fn score(&self, _message: &str, _context: Option<&Context>) -> Result<f64, AgentError> {
            self.score
                .ok_or_else(|| AgentError::Scoring("scorer exploded".to_string()))
        }

        async fn handle(
            &self,
            message: &str,
            _context: Option<&Context>,
        ) -> Result<AgentResponse, AgentError> {
            Ok(AgentResponse::new(self.name(), message, 0.5))
        }
    }

    fn router_with(agents: Vec<Arc<dyn Agent>>) -> Router {
        let mut registry = AgentRegistry::new();
        for a in agents {
            registry.register(a);
        }
        Router::new(registry, &RoutingSection::default()).unwrap()
    }

    fn default_router() -> Router {
        Router::new(
            build_default_registry(Arc::new(MockLlmClient), None),
            &RoutingSection::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_registry_is_config_error() {
        let result = Router::new(AgentRegistry::new(), &RoutingSection::default());
        assert!(matches!(result, Err(ConfigError::NoAgents)));
    }

    #[test]
    fn test_preferred_agent_wins() {
        let router = default_router();
        let d = router.route("debug this python code", None, Some("creative"));
        assert_eq!(d.agent_name, "creative");
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.reasoning, "explicit request");

        // 未注册的偏好被忽略
        let d = router.route("debug this python code", None, Some("ghost"));
        assert_eq!(d.agent_name, "code");
    }

    #[test]
    fn test_decisions_are_bounded_and_registered() {
        let router = default_router();
        let messages = [
            "",
            "hello",
            "what is the capital of France",
            "write code to debug this python script and research the latest data and create a plan",
            "\u{1F600}\u{1F600}",
        ];
        for msg in messages {
            let d = router.route(msg, None, None);
            assert!((0.0..=1.0).contains(&d.confidence), "{msg}: {}", d.confidence);
            assert!(router.has_agent(&d.agent_name));
            assert!(d.alternatives.len() <= 2);
            assert!(d.alternatives.windows(2).all(|w| w[0].1 >= w[1].1));
        }
    }

    #[test]
    fn test_failing_scorer_counts_as_zero() {
        let router = router_with(vec![
            FixedAgent::new("research", None),
            FixedAgent::new("code", Some(0.6)),
        ]);
        let d = router.route("anything", None, None);
        assert_eq!(d.agent_name, "code");
        assert!((d.confidence - 0.42).abs() < 1e-9);
        assert!(d.alternatives.is_empty());

        let explanation = router.explain("anything");
        assert_eq!(explanation.scores["research"].agent_score, 0.0);
        assert!(explanation.scores["research"].error.is_some());
    }

    #[test]
    fn test_fallback_cues() {
        let router = router_with(vec![
            FixedAgent::new("research", Some(0.0)),
            FixedAgent::new("creative", Some(0.0)),
            FixedAgent::new("task", Some(0.0)),
        ]);
        let d = router.route("why", None, None);
        assert_eq!(d.agent_name, "research");
        assert_eq!(d.confidence, 0.5);
        assert!(d.reasoning.contains("fallback"));

        assert_eq!(router.fallback("generate a haiku"), "creative");
        assert_eq!(router.fallback("schedule things"), "task");
        assert_eq!(router.fallback("hmm"), "research");
    }

    #[test]
    fn test_fallback_target_missing_uses_first_registered() {
        let router = router_with(vec![FixedAgent::new("only", Some(0.0))]);
        let d = router.route("explain this", None, None);
        assert_eq!(d.agent_name, "only");
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let router = router_with(vec![
            FixedAgent::new("first", Some(0.5)),
            FixedAgent::new("second", Some(0.5)),
        ]);
        let d = router.route("x", None, None);
        assert_eq!(d.agent_name, "first");
        assert_eq!(d.alternatives, vec![("second".to_string(), 0.35)]);
    }

    #[test]
    fn test_suggest_reroute() {
        let router = router_with(vec![
            FixedAgent::new("research", Some(0.9)),
            FixedAgent::new("code", Some(0.8)),
            FixedAgent::new("task", Some(0.0)),
        ]);
        assert_eq!(router.suggest_reroute("x", "research", "looks fine"), None);
        assert_eq!(
            router.suggest_reroute("x", "research", "That was WRONG").as_deref(),
            Some("code")
        );
        assert_eq!(
            router.suggest_reroute("x", "code", "incorrect").as_deref(),
            Some("research")
        );
    }

    #[test]
    fn test_analyze_patterns() {
        let router = default_router();
        assert!(router.analyze_patterns(Vec::<&str>::new()).is_none());

        let patterns = router
            .analyze_patterns(["code", "code", "research", "code"])
            .unwrap();
        assert_eq!(patterns.total_messages, 4);
        assert_eq!(patterns.agent_usage["code"], 3);
        assert_eq!(patterns.usage_percentages["research"], 25.0);
        assert_eq!(patterns.most_used_agent.as_deref(), Some("code"));
        assert_eq!(patterns.least_used_agent.as_deref(), Some("research"));
        assert_eq!(patterns.routing_diversity, 50.0);
    }
}
