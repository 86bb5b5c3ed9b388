//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CONDUCTOR__*` 覆盖（双下划线表示嵌套，如 `CONDUCTOR__LLM__PROVIDER=openai`）。
//! 路由关键词表、协作触发阈值等都是可调参数而不是代码里的常量；配置在启动时显式传给
//! Router / Coordinator / DurableStore，不存在全局单例。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::ConfigError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub memory: MemorySection,
    pub routing: RoutingSection,
    pub collaboration: CollaborationSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、数据目录、固定会话 ID
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 持久化根目录（conversations.db 与 sessions/ 都在其下）
    pub data_dir: PathBuf,
    /// 指定会话 ID；未设置时每次启动生成新的 UUID
    pub session_id: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "conductor".to_string(),
            data_dir: PathBuf::from("./data/memory"),
            session_id: None,
        }
    }
}

/// [memory] 段：记忆容量与摘要长度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 每个 Agent 的记忆容量，同时也是会话日志文件保留的条数
    pub max_conversation_history: usize,
    pub summary_max_length: usize,
    /// 注入到 Agent 上下文中的最近对话条数
    pub prompt_history_entries: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_conversation_history: 100,
            summary_max_length: 500,
            prompt_history_entries: 3,
        }
    }
}

/// 关键词与权重
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct KeywordWeight {
    pub keyword: String,
    pub weight: f64,
}

/// [routing.keywords] 段：带版本号的 agent → 关键词 → 权重表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeywordTableSection {
    pub version: u32,
    pub agents: BTreeMap<String, Vec<KeywordWeight>>,
}

/// [routing.fallback] 段：没有 Agent 达到置信度下限时的语言线索兜底
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackSection {
    pub question_cues: Vec<String>,
    pub question_agent: String,
    pub creation_cues: Vec<String>,
    pub creation_agent: String,
    pub organize_cues: Vec<String>,
    pub organize_agent: String,
    pub default_agent: String,
}

/// [routing] 段：分数合成权重、置信度下限与关键词表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub agent_weight: f64,
    pub keyword_weight: f64,
    pub confidence_floor: f64,
    pub fallback_confidence: f64,
    /// 保留的备选 Agent 数
    pub alternatives: usize,
    pub keywords: KeywordTableSection,
    pub fallback: FallbackSection,
}

/// [collaboration] 段：协作触发条件、次要 Agent 选择与任务模板
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollaborationSection {
    pub phrases: Vec<String>,
    pub domain_keywords: Vec<String>,
    pub min_domain_hits: usize,
    /// 超过该词数即视为复杂请求
    pub word_threshold: usize,
    pub max_secondary: usize,
    pub secondary_keywords: BTreeMap<String, Vec<String>>,
    /// agent → 准备步骤任务模板，`{message}` 会被替换为原始消息
    pub templates: BTreeMap<String, String>,
    pub manual_synthesis_confidence: f64,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openrouter / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            model: "openai/gpt-oss-20b:free".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [tools] 段：单次工具调用超时（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn weighted(items: &[&str], weight: f64) -> Vec<KeywordWeight> {
    items
        .iter()
        .map(|k| KeywordWeight {
            keyword: k.to_string(),
            weight,
        })
        .collect()
}

impl Default for KeywordTableSection {
    fn default() -> Self {
        let mut agents = BTreeMap::new();
        agents.insert(
            "research".to_string(),
            weighted(
                &[
                    "search", "find", "research", "information", "facts", "data", "what is",
                    "who is", "when", "where", "why", "how many", "statistics", "analysis",
                    "study", "investigate", "compare",
                ],
                0.1,
            ),
        );
        agents.insert(
            "code".to_string(),
            weighted(
                &[
                    "code", "program", "script", "function", "debug", "fix", "python",
                    "javascript", "java", "programming", "development", "algorithm",
                    "implementation", "software", "app", "bug",
                ],
                0.1,
            ),
        );
        agents.insert(
            "creative".to_string(),
            weighted(
                &[
                    "create", "write", "story", "idea", "brainstorm", "creative", "content",
                    "blog", "article", "poem", "design", "imagine", "innovative", "original",
                    "artistic", "inspiration",
                ],
                0.1,
            ),
        );
        agents.insert(
            "task".to_string(),
            weighted(
                &[
                    "plan", "organize", "schedule", "manage", "project", "task", "timeline",
                    "deadline", "coordinate", "prioritize", "workflow", "goal", "objective",
                    "strategy", "breakdown", "milestone",
                ],
                0.1,
            ),
        );
        Self { version: 1, agents }
    }
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            question_cues: strings(&["what", "how", "why", "explain"]),
            question_agent: "research".to_string(),
            creation_cues: strings(&["create", "write", "generate"]),
            creation_agent: "creative".to_string(),
            organize_cues: strings(&["plan", "organize", "schedule"]),
            organize_agent: "task".to_string(),
            default_agent: "research".to_string(),
        }
    }
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            agent_weight: 0.7,
            keyword_weight: 0.3,
            confidence_floor: 0.1,
            fallback_confidence: 0.5,
            alternatives: 2,
            keywords: KeywordTableSection::default(),
            fallback: FallbackSection::default(),
        }
    }
}

impl Default for CollaborationSection {
    fn default() -> Self {
        let mut secondary_keywords = BTreeMap::new();
        secondary_keywords.insert(
            "research".to_string(),
            strings(&["research", "find", "information", "data", "facts", "search"]),
        );
        secondary_keywords.insert(
            "code".to_string(),
            strings(&["code", "program", "implement", "development", "software"]),
        );
        secondary_keywords.insert(
            "creative".to_string(),
            strings(&["create", "write", "design", "creative", "content", "idea"]),
        );
        secondary_keywords.insert(
            "task".to_string(),
            strings(&["plan", "organize", "manage", "schedule", "coordinate"]),
        );

        let mut templates = BTreeMap::new();
        templates.insert(
            "research".to_string(),
            "Research background information related to: {message}".to_string(),
        );
        templates.insert(
            "task".to_string(),
            "Create an implementation plan for: {message}".to_string(),
        );
        templates.insert(
            "code".to_string(),
            "Analyze technical requirements for: {message}".to_string(),
        );
        templates.insert(
            "creative".to_string(),
            "Generate creative concepts for: {message}".to_string(),
        );

        Self {
            phrases: strings(&[
                "research and write",
                "analyze and create",
                "plan and implement",
                "compare and design",
                "investigate and report",
                "study and develop",
            ]),
            domain_keywords: strings(&[
                "research", "code", "creative", "task", "plan", "write", "analyze", "implement",
            ]),
            min_domain_hits: 2,
            word_threshold: 50,
            max_secondary: 2,
            secondary_keywords,
            templates,
            manual_synthesis_confidence: 0.7,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CONDUCTOR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CONDUCTOR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CONDUCTOR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    Ok(c.try_deserialize()?)
}

/// 重新从磁盘与环境变量加载配置；调用方决定是否用新配置重建 Router / Coordinator
pub fn reload_config() -> Result<AppConfig, ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.memory.max_conversation_history, 100);
        assert_eq!(cfg.routing.agent_weight, 0.7);
        assert_eq!(cfg.routing.keyword_weight, 0.3);
        assert_eq!(cfg.routing.confidence_floor, 0.1);
        assert_eq!(cfg.collaboration.word_threshold, 50);
        assert_eq!(cfg.collaboration.max_secondary, 2);
        assert_eq!(cfg.routing.keywords.agents.len(), 4);
    }

    #[test]
    fn test_partial_toml_keeps_section_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[memory]\nmax_conversation_history = 7\n\n[collaboration]\nword_threshold = 12\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.memory.max_conversation_history, 7);
        assert_eq!(cfg.memory.summary_max_length, 500);
        assert_eq!(cfg.collaboration.word_threshold, 12);
        assert_eq!(cfg.collaboration.min_domain_hits, 2);
        assert_eq!(cfg.routing.fallback.default_agent, "research");
    }
}
