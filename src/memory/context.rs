//! 分 Agent 的对话记忆
//!
//! 每个 Agent 名拥有一份独立的 ConversationMemory：
//! - 固定容量的 FIFO 事件日志（ContextEntry，超出容量时静默淘汰最旧的）
//! - 由用户消息派生的话题集合与话题历史（最多 50 条）
//! - 会话状态：当前任务、用户偏好、对话模式
//!
//! 只做进程内计算，不会挂起；不负责持久化（见 store 模块）。

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 话题历史保留条数
pub const TOPIC_HISTORY_LIMIT: usize = 50;

/// 摘要中每条对话片段的最大字符数
const SNIPPET_CHARS: usize = 100;

/// 话题 → 关键词
const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("programming", &["code", "program", "script", "development", "software", "algorithm"]),
    ("research", &["research", "study", "analyze", "information", "data", "facts"]),
    ("creative", &["create", "write", "design", "story", "creative", "idea"]),
    ("planning", &["plan", "organize", "schedule", "task", "project", "goal"]),
    ("technology", &["ai", "machine learning", "tech", "computer", "digital"]),
    ("business", &["business", "company", "market", "strategy", "finance"]),
    ("education", &["learn", "teach", "course", "study", "tutorial", "explain"]),
    ("science", &["science", "research", "experiment", "hypothesis", "theory"]),
];

/// 对话模式检测顺序，先命中者生效
const MODE_KEYWORDS: &[(ConversationMode, &[&str])] = &[
    (ConversationMode::Creative, &["creative", "brainstorm", "idea"]),
    (ConversationMode::Analytical, &["analyze", "research", "study"]),
    (ConversationMode::Planning, &["plan", "organize", "task"]),
    (ConversationMode::Technical, &["code", "program", "debug"]),
];

const TASK_CUES: &[&str] = &["help me", "i need to", "can you", "please", "task", "project"];
const PREFERENCE_CUES: &[&str] = &["i prefer", "i like", "i don't like", "i want", "i need"];

/// 单条记忆：一次 user / assistant 交互
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub agent_response: String,
    pub agent_name: String,
    pub context_type: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// 对话模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    #[default]
    General,
    Creative,
    Analytical,
    Planning,
    Technical,
}

impl ConversationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationMode::General => "general",
            ConversationMode::Creative => "creative",
            ConversationMode::Analytical => "analytical",
            ConversationMode::Planning => "planning",
            ConversationMode::Technical => "technical",
        }
    }
}

/// 用户偏好陈述
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub statement: String,
    pub timestamp: DateTime<Utc>,
}

/// 话题历史记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub timestamp: DateTime<Utc>,
    pub topics: Vec<String>,
    pub message_snippet: String,
}

/// 会话状态：每次 record 时更新，clear 时重置
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub current_topics: BTreeSet<String>,
    pub topic_history: Vec<TopicRecord>,
    pub current_task: Option<String>,
    pub user_preferences: BTreeMap<String, Preference>,
    pub conversation_mode: ConversationMode,
}

/// 记忆元数据
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub created_at: DateTime<Utc>,
    /// 累计交互数（不受 FIFO 淘汰影响）
    pub total_interactions: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// 完整导出：import 时整体替换
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub agent_name: String,
    pub metadata: MemoryMetadata,
    pub entries: Vec<ContextEntry>,
    pub state: ConversationState,
    pub exported_at: DateTime<Utc>,
}

/// relevant() 的结果：条目与相关度
#[derive(Clone, Debug, PartialEq)]
pub struct RelevantEntry {
    pub entry: ContextEntry,
    pub score: f64,
}

/// 记忆统计
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemoryStats {
    pub agent_name: String,
    pub stored_entries: usize,
    pub total_interactions: u64,
    pub first_interaction: Option<DateTime<Utc>>,
    pub last_interaction: Option<DateTime<Utc>>,
    pub avg_user_message_length: f64,
    pub avg_agent_response_length: f64,
    pub topic_distribution: BTreeMap<String, usize>,
    pub conversation_mode: ConversationMode,
    pub current_task: Option<String>,
    pub user_preferences_count: usize,
}

/// 单个 Agent 的有界对话记忆
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    agent_name: String,
    capacity: usize,
    entries: VecDeque<ContextEntry>,
    state: ConversationState,
    metadata: MemoryMetadata,
}

impl ConversationMemory {
    pub fn new(agent_name: impl Into<String>, capacity: usize) -> Self {
        Self {
            agent_name: agent_name.into(),
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            state: ConversationState::default(),
            metadata: MemoryMetadata {
                created_at: Utc::now(),
                total_interactions: 0,
                last_activity: None,
            },
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn metadata(&self) -> &MemoryMetadata {
        &self.metadata
    }

    /// 记录一次交互：追加条目、提取话题、更新会话状态
    pub fn record(
        &mut self,
        user_message: &str,
        agent_response: &str,
        context_type: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) {
        let now = Utc::now();
        let entry = ContextEntry {
            timestamp: now,
            user_message: user_message.to_string(),
            agent_response: agent_response.to_string(),
            agent_name: self.agent_name.clone(),
            context_type: context_type.unwrap_or("conversation").to_string(),
            metadata: metadata.unwrap_or_default(),
        };

        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }

        self.metadata.total_interactions += 1;
        self.metadata.last_activity = Some(now);

        let lower = user_message.to_lowercase();
        self.track_topics(user_message, &lower, now);
        self.update_state(user_message, &lower, now);

        tracing::debug!(
            agent = %self.agent_name,
            entries = self.entries.len(),
            "recorded interaction"
        );
    }

    fn track_topics(&mut self, message: &str, lower: &str, now: DateTime<Utc>) {
        let new_topics: Vec<String> = TOPIC_KEYWORDS
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(topic, _)| topic.to_string())
            .collect();

        if new_topics.is_empty() {
            return;
        }

        self.state.current_topics.extend(new_topics.iter().cloned());
        self.state.topic_history.push(TopicRecord {
            timestamp: now,
            topics: new_topics,
            message_snippet: message.chars().take(SNIPPET_CHARS).collect(),
        });
        let len = self.state.topic_history.len();
        if len > TOPIC_HISTORY_LIMIT {
            self.state.topic_history.drain(..len - TOPIC_HISTORY_LIMIT);
        }
    }

    fn update_state(&mut self, message: &str, lower: &str, now: DateTime<Utc>) {
        if message.chars().count() > 20 && TASK_CUES.iter().any(|c| lower.contains(c)) {
            self.state.current_task = Some(message.chars().take(200).collect());
        }

        if PREFERENCE_CUES.iter().any(|c| lower.contains(c)) {
            let key = format!("preference_{}", self.state.user_preferences.len());
            self.state.user_preferences.insert(
                key,
                Preference {
                    statement: message.to_string(),
                    timestamp: now,
                },
            );
        }

        if let Some((mode, _)) = MODE_KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        {
            self.state.conversation_mode = *mode;
        }
    }

    /// 最近 n 条，按时间正序（最旧在前）
    pub fn recent(&self, n: usize) -> Vec<ContextEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// 按词重叠给每条记忆打分：查询词（长度 > 3）与用户消息词互为子串记 1 分，与回复词记 0.5 分；
    /// 同分按时间倒序，返回得分非零的前 max_entries 条
    pub fn relevant(&self, query: &str, max_entries: usize) -> Vec<RelevantEntry> {
        let query_lower = query.to_lowercase();
        let query_words: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|w| w.chars().count() > 3)
            .collect();
        if query_words.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<RelevantEntry> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let user = entry.user_message.to_lowercase();
                let response = entry.agent_response.to_lowercase();
                let score = overlap(&query_words, &user, 1.0) + overlap(&query_words, &response, 0.5);
                (score > 0.0).then(|| RelevantEntry {
                    entry: entry.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.entry.timestamp.cmp(&a.entry.timestamp))
        });
        scored.truncate(max_entries);
        scored
    }

    /// 有界文本摘要：Agent 名、交互数、话题、最近 3 次交互（各截断到 100 字符）、当前任务
    pub fn summary(&self, max_length: usize) -> String {
        if self.entries.is_empty() {
            return truncate_with_ellipsis("No conversation history available.", max_length);
        }

        let mut parts = vec![
            format!("Conversation with {} agent", self.agent_name),
            format!("Total interactions: {}", self.metadata.total_interactions),
        ];

        if !self.state.current_topics.is_empty() {
            let topics: Vec<&str> = self
                .state
                .current_topics
                .iter()
                .take(5)
                .map(String::as_str)
                .collect();
            parts.push(format!("Current topics: {}", topics.join(", ")));
        }

        parts.push("Recent conversation:".to_string());
        for entry in self.recent(3) {
            parts.push(format!("User: {}", snippet(&entry.user_message)));
            parts.push(format!("Assistant: {}", snippet(&entry.agent_response)));
        }

        if let Some(task) = &self.state.current_task {
            parts.push(format!("Current task: {}", task));
        }

        truncate_with_ellipsis(&parts.join("\n"), max_length)
    }

    /// 供 Agent 提示词使用的上下文片段：最近对话、话题、任务与模式
    pub fn context_for_prompt(&self, history_entries: usize) -> String {
        let mut parts = Vec::new();

        let recent = self.recent(history_entries);
        if !recent.is_empty() {
            parts.push("Recent conversation:".to_string());
            for entry in &recent {
                parts.push(format!("User: {}", entry.user_message));
                parts.push(format!("Assistant: {}", entry.agent_response));
            }
        }

        if !self.state.current_topics.is_empty() {
            let topics: Vec<&str> = self
                .state
                .current_topics
                .iter()
                .take(5)
                .map(String::as_str)
                .collect();
            parts.push(format!("\nCurrent conversation topics: {}", topics.join(", ")));
        }

        if let Some(task) = &self.state.current_task {
            parts.push(format!("\nCurrent task: {}", task));
        }
        if self.state.conversation_mode != ConversationMode::General {
            parts.push(format!(
                "Conversation mode: {}",
                self.state.conversation_mode.as_str()
            ));
        }

        parts.join("\n")
    }

    pub fn stats(&self) -> MemoryStats {
        let n = self.entries.len();
        let (user_chars, response_chars) = self.entries.iter().fold((0usize, 0usize), |acc, e| {
            (
                acc.0 + e.user_message.chars().count(),
                acc.1 + e.agent_response.chars().count(),
            )
        });
        let avg = |total: usize| {
            if n == 0 {
                0.0
            } else {
                (total as f64 / n as f64 * 10.0).round() / 10.0
            }
        };

        let topic_distribution = self
            .state
            .current_topics
            .iter()
            .map(|topic| {
                let count = self
                    .state
                    .topic_history
                    .iter()
                    .filter(|r| r.topics.contains(topic))
                    .count();
                (topic.clone(), count)
            })
            .collect();

        MemoryStats {
            agent_name: self.agent_name.clone(),
            stored_entries: n,
            total_interactions: self.metadata.total_interactions,
            first_interaction: self.entries.front().map(|e| e.timestamp),
            last_interaction: self.entries.back().map(|e| e.timestamp),
            avg_user_message_length: avg(user_chars),
            avg_agent_response_length: avg(response_chars),
            topic_distribution,
            conversation_mode: self.state.conversation_mode,
            current_task: self.state.current_task.clone(),
            user_preferences_count: self.state.user_preferences.len(),
        }
    }

    pub fn export(&self) -> MemorySnapshot {
        MemorySnapshot {
            agent_name: self.agent_name.clone(),
            metadata: self.metadata.clone(),
            entries: self.entries.iter().cloned().collect(),
            state: self.state.clone(),
            exported_at: Utc::now(),
        }
    }

    /// 整体替换当前状态（不合并）；条目超出容量时保留最新的 capacity 条
    pub fn import(&mut self, snapshot: MemorySnapshot) {
        self.clear();
        let skip = snapshot.entries.len().saturating_sub(self.capacity);
        self.entries = snapshot.entries.into_iter().skip(skip).collect();
        self.state = snapshot.state;
        self.metadata = snapshot.metadata;
        tracing::info!(agent = %self.agent_name, entries = self.entries.len(), "imported memory");
    }

    /// 重置 FIFO、话题与会话状态；不影响持久化存储
    pub fn clear(&mut self) {
        self.entries.clear();
        self.state = ConversationState::default();
        self.metadata.total_interactions = 0;
        self.metadata.last_activity = None;
    }
}

/// 查询词与文本中各词互为子串的次数乘以权重
fn overlap(query_words: &[&str], text: &str, weight: f64) -> f64 {
    let mut score = 0.0;
    for q in query_words {
        for w in text.split_whitespace() {
            if q.contains(w) || w.contains(q) {
                score += weight;
            }
        }
    }
    score
}

fn snippet(text: &str) -> String {
    if text.chars().count() > SNIPPET_CHARS {
        format!("{}...", text.chars().take(SNIPPET_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 超长时截断为 max_length 个字符（末尾三个字符为 "..."）
fn truncate_with_ellipsis(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    if max_length < 3 {
        return text.chars().take(max_length).collect();
    }
    format!("{}...", text.chars().take(max_length - 3).collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(memory: &ConversationMemory, n: usize) -> Vec<String> {
        memory.recent(n).into_iter().map(|e| e.user_message).collect()
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut memory = ConversationMemory::new("research", 2);
        memory.record("A", "a", None, None);
        memory.record("B", "b", None, None);
        memory.record("C", "c", None, None);
        assert_eq!(messages(&memory, 2), vec!["B", "C"]);
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.metadata().total_interactions, 3);
    }

    #[test]
    fn test_recent_is_chronological_and_bounded() {
        let mut memory = ConversationMemory::new("code", 5);
        for i in 0..8 {
            memory.record(&format!("m{i}"), "ok", None, None);
        }
        assert_eq!(messages(&memory, 5), vec!["m3", "m4", "m5", "m6", "m7"]);
        assert_eq!(messages(&memory, 2), vec!["m6", "m7"]);
        assert_eq!(memory.recent(50).len(), 5);
        assert!(ConversationMemory::new("empty", 3).recent(3).is_empty());
    }

    #[test]
    fn test_topics_accumulate_and_history_is_bounded() {
        let mut memory = ConversationMemory::new("task", 100);
        memory.record("Let's write some code", "sure", None, None);
        assert!(memory.state().current_topics.contains("programming"));
        assert!(memory.state().current_topics.contains("creative"));

        memory.record("hello there", "hi", None, None);
        assert!(memory.state().current_topics.contains("programming"));

        for _ in 0..60 {
            memory.record("plan the project", "ok", None, None);
        }
        assert_eq!(memory.state().topic_history.len(), TOPIC_HISTORY_LIMIT);
    }

    #[test]
    fn test_mode_priority_and_task_detection() {
        let mut memory = ConversationMemory::new("creative", 10);
        memory.record("can you brainstorm and analyze ideas for my project", "ok", None, None);
        assert_eq!(memory.state().conversation_mode, ConversationMode::Creative);
        assert!(memory.state().current_task.is_some());

        memory.record("debug this", "ok", None, None);
        assert_eq!(memory.state().conversation_mode, ConversationMode::Technical);

        let mut short = ConversationMemory::new("task", 10);
        short.record("please", "ok", None, None);
        assert!(short.state().current_task.is_none());
    }

    #[test]
    fn test_preference_statement_is_recorded() {
        let mut memory = ConversationMemory::new("creative", 10);
        memory.record("I prefer short answers", "noted", None, None);
        memory.record("nothing special", "ok", None, None);
        let prefs = &memory.state().user_preferences;
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs["preference_0"].statement, "I prefer short answers");
    }

    #[test]
    fn test_relevant_scores_user_over_response() {
        let mut memory = ConversationMemory::new("research", 10);
        memory.record("tell me about volcanoes", "lava is hot", None, None);
        memory.record("weather today", "volcanoes are unrelated here", None, None);
        memory.record("cats", "dogs", None, None);

        let hits = memory.relevant("volcanoes facts", 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.user_message, "tell me about volcanoes");
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].score, 0.5);

        assert!(memory.relevant("the a of", 5).is_empty());
        assert_eq!(memory.relevant("volcanoes", 1).len(), 1);
    }

    #[test]
    fn test_relevant_ties_prefer_recent() {
        let mut memory = ConversationMemory::new("research", 10);
        memory.record("rust ownership", "x", None, None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        memory.record("rust borrowing", "y", None, None);
        let hits = memory.relevant("rust", 2);
        assert_eq!(hits[0].entry.user_message, "rust borrowing");
    }

    #[test]
    fn test_summary_is_bounded() {
        let memory = ConversationMemory::new("code", 10);
        assert_eq!(memory.summary(500), "No conversation history available.");

        let mut memory = ConversationMemory::new("code", 10);
        memory.record(&"x".repeat(300), &"y".repeat(300), None, None);
        let summary = memory.summary(500);
        assert!(summary.contains("Conversation with code agent"));
        assert!(summary.contains(&format!("User: {}...", "x".repeat(100))));

        let short = memory.summary(40);
        assert_eq!(short.chars().count(), 40);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn test_export_clear_import_round_trip() {
        let mut memory = ConversationMemory::new("task", 10);
        memory.record("plan my week", "done", Some("planning"), None);
        memory.record("I like mornings", "noted", None, None);
        let before = memory.recent(10);
        let snapshot = memory.export();

        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.state(), &ConversationState::default());

        memory.import(snapshot.clone());
        assert_eq!(memory.recent(10), before);
        assert_eq!(memory.state(), &snapshot.state);

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: MemorySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.entries, before);
    }

    #[test]
    fn test_import_replaces_instead_of_merging() {
        let mut source = ConversationMemory::new("task", 10);
        source.record("first", "1", None, None);
        let snapshot = source.export();

        let mut target = ConversationMemory::new("task", 10);
        target.record("old", "0", None, None);
        target.record("older", "0", None, None);
        target.import(snapshot);
        assert_eq!(messages(&target, 10), vec!["first"]);
    }
}
