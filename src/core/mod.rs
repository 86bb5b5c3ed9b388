//! 核心类型：错误分类与流水线阶段

pub mod error;
pub mod state;

pub use error::{AgentError, ConfigError, StoreError};
pub use state::PipelinePhase;
