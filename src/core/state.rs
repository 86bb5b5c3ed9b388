//! 单次请求的流水线阶段
//!
//! ROUTING → {DIRECT | COLLABORATING{PREP* → SYNTHESIZING}} → RECORDING → DONE，
//! 任一阶段出错进入 Error，最终仍产出一条合法回复。

use serde::Serialize;

/// 请求处理阶段（日志与错误回复的 metadata 中使用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Routing,
    Direct,
    Preparing,
    Synthesizing,
    Recording,
    Done,
    Error,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Routing => "routing",
            PipelinePhase::Direct => "direct",
            PipelinePhase::Preparing => "preparing",
            PipelinePhase::Synthesizing => "synthesizing",
            PipelinePhase::Recording => "recording",
            PipelinePhase::Done => "done",
            PipelinePhase::Error => "error",
        }
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
