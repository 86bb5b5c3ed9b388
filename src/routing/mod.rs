//! 路由：关键词权重表 + Agent 自评分 → RoutingDecision

pub mod keywords;
pub mod router;

pub use keywords::KeywordTable;
pub use router::{AgentScoreDetail, Router, RoutingDecision, RoutingExplanation, RoutingPatterns};
