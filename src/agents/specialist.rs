//! 内置专家 Agent（research / code / creative / task）
//!
//! 评分：能力标签命中 +0.3，所持工具的关键词命中 +0.2，再叠加各种类的关键词表，封顶 1.0。
//! 处理：按种类判断是否需要先调用工具（搜索 / 执行代码 / 保存文件），
//! 然后以角色 system prompt + 对话上下文 + 用户请求调用 LLM。

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::agents::{
    Agent, AgentDescriptor, AgentKind, AgentResponse, Context, CONVERSATION_CONTEXT_KEY,
};
use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::tools::ToolExecutor;

const RESEARCH_KEYWORDS: &[&str] = &[
    "research", "find", "search", "what is", "who is", "when did", "where is", "how many",
    "statistics", "data", "facts", "information", "explain", "tell me about", "learn about",
    "study", "analyze", "investigate", "compare", "contrast", "history", "background", "details",
    "source",
];
const QUESTION_WORDS: &[&str] = &["what", "who", "when", "where", "why", "how"];
const SEARCH_INDICATORS: &[&str] = &[
    "current", "latest", "recent", "today", "now", "statistics", "data", "news", "price", "stock",
    "weather", "who is", "what is", "when did", "where is", "how many",
];
const PERSONAL_INDICATORS: &[&str] = &["i think", "my opinion", "what do you think", "personal", "yourself"];

const CODE_KEYWORDS: &[&str] = &[
    "code", "program", "script", "function", "class", "method", "algorithm", "debug", "error",
    "bug", "fix", "optimize", "refactor", "review", "implement", "create", "write", "develop",
    "build", "test",
];
const LANGUAGES: &[&str] = &[
    "python", "javascript", "typescript", "java", "c++", "rust", "html", "css", "sql", "bash",
    "shell", "json", "yaml", "programming", "software", "development",
];
const CODE_PATTERNS: &[&str] = &[
    r"```", r"def\s+\w+", r"function\s+\w+", r"class\s+\w+", r"import\s+\w+", r"#include",
    r"public\s+class", r"console\.log", r"print\(",
];
const CODE_PHRASES: &[&str] = &["write code", "create function", "debug this", "fix the code"];

const CREATIVE_KEYWORDS: &[&str] = &[
    "create", "write", "story", "poem", "idea", "brainstorm", "imagine", "design", "creative",
    "artistic", "innovative", "original", "unique", "inspiration", "concept", "theme",
    "character", "plot", "narrative", "content", "script", "dialogue", "scene", "chapter", "book",
    "novel",
];
const CREATIVE_ACTIONS: &[&str] = &[
    "compose", "craft", "develop", "invent", "generate", "produce", "conceive", "formulate",
    "devise", "dream up", "come up with",
];
const CREATIVE_OUTPUTS: &[&str] = &[
    "blog post", "article", "essay", "story", "poem", "song", "script", "advertisement", "slogan",
    "tagline", "headline", "caption", "description",
];
const CREATIVE_PHRASES: &[&str] = &[
    "be creative", "think creatively", "creative ideas", "out of the box", "brainstorm",
    "come up with", "write a", "create a", "design a",
];

const TASK_KEYWORDS: &[&str] = &[
    "plan", "planning", "project", "task", "schedule", "organize", "manage", "coordinate",
    "timeline", "deadline", "milestone", "goal", "objective", "strategy", "workflow", "process",
];
const TASK_ACTIONS: &[&str] = &[
    "create plan", "make schedule", "organize", "break down", "prioritize", "track progress",
    "set goals", "manage time", "coordinate", "delegate", "optimize", "streamline",
];
const PROJECT_TERMS: &[&str] = &[
    "project management", "agile", "scrum", "kanban", "sprint", "backlog", "roadmap",
    "deliverables", "resources", "budget",
];
const TASK_PHRASES: &[&str] = &[
    "help me plan", "create a plan", "organize this", "break this down", "manage this project",
    "set up a timeline", "track progress",
];

/// 关键词命中数 × 增量
fn tally(text: &str, words: &[&str], increment: f64) -> f64 {
    words.iter().filter(|w| text.contains(*w)).count() as f64 * increment
}

fn any_of(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// 内置专家 Agent：一个 AgentKind + LLM + 可选的工具执行器
pub struct SpecialistAgent {
    kind: AgentKind,
    descriptor: AgentDescriptor,
    llm: Arc<dyn LlmClient>,
    tools: Option<ToolExecutor>,
    code_patterns: Vec<Regex>,
}

impl SpecialistAgent {
    pub fn new(kind: AgentKind, llm: Arc<dyn LlmClient>) -> Self {
        let keywords: &[&str] = match kind {
            AgentKind::Research => RESEARCH_KEYWORDS,
            AgentKind::Code => CODE_KEYWORDS,
            AgentKind::Creative => CREATIVE_KEYWORDS,
            AgentKind::Task => TASK_KEYWORDS,
        };
        let code_patterns = if kind == AgentKind::Code {
            CODE_PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect()
        } else {
            Vec::new()
        };
        Self {
            kind,
            descriptor: AgentDescriptor::new(
                kind.as_str(),
                kind.capability_tags().iter().copied(),
                keywords.iter().copied(),
            ),
            llm,
            tools: None,
            code_patterns,
        }
    }

    pub fn with_tools(mut self, tools: ToolExecutor) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    /// 本 Agent 可用且已注册的工具
    fn available_tool(&self, name: &str) -> Option<&ToolExecutor> {
        self.tools
            .as_ref()
            .filter(|t| self.kind.tool_names().contains(&name) && t.has_tool(name))
    }

    /// 能力标签 +0.3；所持工具的关键词 +0.2
    fn base_score(&self, lower: &str) -> f64 {
        let capability = self
            .descriptor
            .capability_tags
            .iter()
            .filter(|c| lower.contains(c.to_lowercase().as_str()))
            .count() as f64
            * 0.3;

        let tool_keywords = match &self.tools {
            Some(executor) => self
                .kind
                .tool_names()
                .iter()
                .filter_map(|name| executor.registry().get(name))
                .flat_map(|tool| {
                    tool.keywords()
                        .iter()
                        .map(|k| k.to_lowercase())
                        .collect::<Vec<_>>()
                })
                .filter(|k| lower.contains(k.as_str()))
                .count() as f64
                * 0.2,
            None => 0.0,
        };

        capability + tool_keywords
    }

    fn kind_score(&self, message: &str, lower: &str) -> f64 {
        match self.kind {
            AgentKind::Research => {
                let mut s = tally(lower, RESEARCH_KEYWORDS, 0.2);
                if any_of(lower, QUESTION_WORDS) {
                    s += 0.3;
                }
                s
            }
            AgentKind::Code => {
                let mut s = tally(lower, CODE_KEYWORDS, 0.25) + tally(lower, LANGUAGES, 0.3);
                if self.code_patterns.iter().any(|re| re.is_match(message)) {
                    s += 0.4;
                }
                if any_of(lower, CODE_PHRASES) {
                    s += 0.5;
                }
                s
            }
            AgentKind::Creative => {
                let mut s = tally(lower, CREATIVE_KEYWORDS, 0.2)
                    + tally(lower, CREATIVE_ACTIONS, 0.25)
                    + tally(lower, CREATIVE_OUTPUTS, 0.3);
                if any_of(lower, CREATIVE_PHRASES) {
                    s += 0.4;
                }
                s
            }
            AgentKind::Task => {
                let mut s = tally(lower, TASK_KEYWORDS, 0.2)
                    + tally(lower, TASK_ACTIONS, 0.3)
                    + tally(lower, PROJECT_TERMS, 0.4);
                if any_of(lower, TASK_PHRASES) {
                    s += 0.5;
                }
                s
            }
        }
    }

    /// 处理前的工具调用；返回 (工具名, 写入提示词的结果文本)
    async fn pre_tools(&self, message: &str, lower: &str) -> Option<(String, String)> {
        match self.kind {
            AgentKind::Research => {
                if any_of(lower, PERSONAL_INDICATORS) || !any_of(lower, SEARCH_INDICATORS) {
                    return None;
                }
                let executor = self.available_tool("web_search")?;
                let args = json!({ "query": message, "max_results": 5 });
                let text = match executor.execute("web_search", args).await {
                    Ok(result) => Value::Object(result).to_string(),
                    Err(e) => {
                        tracing::warn!(agent = %self.name(), error = %e, "search failed");
                        format!("Search unavailable: {e}")
                    }
                };
                Some(("web_search".to_string(), text))
            }
            AgentKind::Code => {
                if !(lower.contains("run") || lower.contains("execute")) {
                    return None;
                }
                let code = extract_code(message)?;
                let executor = self.available_tool("code_exec")?;
                let args = json!({ "code": code, "language": "python" });
                let text = match executor.execute("code_exec", args).await {
                    Ok(result) => format!(
                        "Execution result:\n{}",
                        result
                            .get("output")
                            .and_then(Value::as_str)
                            .unwrap_or("No output")
                    ),
                    Err(e) => format!("Execution error: {e}"),
                };
                Some(("code_exec".to_string(), text))
            }
            AgentKind::Creative | AgentKind::Task => None,
        }
    }

    /// 需要保存时把生成内容写入文件
    async fn post_tools(&self, lower: &str, content: &str) -> Option<String> {
        if !matches!(self.kind, AgentKind::Creative | AgentKind::Task) || !lower.contains("save") {
            return None;
        }
        let executor = self.available_tool("file_ops")?;
        let path = format!(
            "{}_output_{}.md",
            self.kind,
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        let args = json!({ "operation": "write", "path": path, "content": content });
        match executor.execute("file_ops", args).await {
            Ok(_) => Some("file_ops".to_string()),
            Err(e) => {
                tracing::warn!(agent = %self.name(), error = %e, "saving output failed");
                None
            }
        }
    }

    fn build_messages(&self, message: &str, context: Option<&Context>, tool_output: Option<&str>) -> Vec<Message> {
        let mut system = self.kind.system_prompt().to_string();
        if let Some(history) = context
            .and_then(|c| c.get(CONVERSATION_CONTEXT_KEY))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            system.push_str("\n\n");
            system.push_str(history);
        }

        let user = match tool_output {
            Some(output) => format!("{message}\n\nTool results:\n{output}"),
            None => message.to_string(),
        };

        vec![Message::system(system), Message::user(user)]
    }
}

/// 取第一个 ``` 代码块，否则取第一个行内 `code`
fn extract_code(message: &str) -> Option<String> {
    if let Some(start) = message.find("```") {
        let rest = &message[start + 3..];
        let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &rest[body_start..];
        if let Some(end) = body.find("```") {
            let code = body[..end].trim();
            if !code.is_empty() {
                return Some(code.to_string());
            }
        }
    }
    let mut parts = message.split('`');
    parts.next()?;
    parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Agent for SpecialistAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    fn score(&self, message: &str, _context: Option<&Context>) -> Result<f64, AgentError> {
        let lower = message.to_lowercase();
        let score = self.base_score(&lower) + self.kind_score(message, &lower);
        Ok(score.min(1.0))
    }

    async fn handle(
        &self,
        message: &str,
        context: Option<&Context>,
    ) -> Result<AgentResponse, AgentError> {
        let lower = message.to_lowercase();
        let mut tools_used = Vec::new();

        let tool_output = self.pre_tools(message, &lower).await;
        if let Some((name, _)) = &tool_output {
            tools_used.push(name.clone());
        }

        let messages = self.build_messages(message, context, tool_output.as_ref().map(|(_, t)| t.as_str()));
        let content = self.llm.complete(&messages).await.map_err(AgentError::Llm)?;

        if let Some(name) = self.post_tools(&lower, &content).await {
            tools_used.push(name);
        }

        tracing::debug!(agent = %self.name(), tools = ?tools_used, "handled request");

        Ok(AgentResponse::new(self.name(), content, self.kind.default_confidence())
            .with_tools(tools_used)
            .with_reasoning(format!("{} request processed", self.kind))
            .with_metadata("kind", Value::String(self.kind.to_string())))
    }
}
