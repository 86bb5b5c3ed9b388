//! 编排层：协作规划与单会话协调器

pub mod collaboration;
pub mod coordinator;

pub use collaboration::{
    manual_synthesis, merge_tools, needs_collaboration, secondary_agents, synthesis_prompt,
    CollaborationPlan, CollaborationTrigger, PlanStep, COORDINATOR_AGENT, SYNTHESIS_TEMPLATE,
};
pub use coordinator::{AgentRecommendations, Coordinator, CoordinatorResponse, SystemStatus};
