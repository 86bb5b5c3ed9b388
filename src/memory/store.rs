//! 持久化对话存储
//!
//! 双路写入：
//! - SQLite 索引（`conversations` + `session_metadata`），为权威数据源，支持日期范围、搜索、统计
//! - 每个会话一个 JSON 日志文件（`sessions/<id>.json`），只保留最近 N 条，作为 recent 的快速读路径
//!
//! 所有 SQLite 操作经同一把互斥锁串行化，在 spawn_blocking 中执行；日志文件用 tokio::fs 读写。
//! 同一会话只允许一个写者（调用方保证）。

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::AppConfig;
use crate::core::StoreError;

/// 持久化单元：一次处理完成的请求
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub agent_response: String,
    pub agent_used: String,
    #[serde(default)]
    pub tools_used: BTreeSet<String>,
    pub confidence: f64,
    pub routing_confidence: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub session_id: String,
    pub total_messages: u64,
    pub first_message: Option<DateTime<Utc>>,
    pub last_message: Option<DateTime<Utc>>,
    pub average_confidence: f64,
    pub agent_usage: BTreeMap<String, u64>,
    pub tool_usage: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub session_id: String,
    pub exported_at: DateTime<Utc>,
    pub statistics: SessionStatistics,
    pub conversations: Vec<ConversationEntry>,
}

/// 对话存储接口
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 写入索引与会话日志；部分失败时返回 StoreError::Partial
    async fn persist(&self, entry: &ConversationEntry) -> Result<(), StoreError>;

    /// 最近 limit 条，按时间正序
    async fn recent(&self, session_id: &str, limit: usize)
        -> Result<Vec<ConversationEntry>, StoreError>;

    async fn by_date_range(
        &self,
        session_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ConversationEntry>, StoreError>;

    /// 子串匹配用户消息或回复，按时间倒序
    async fn search(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>, StoreError>;

    async fn statistics(&self, session_id: &str) -> Result<SessionStatistics, StoreError>;

    async fn clear_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// 清理 last_activity 早于 days 天前的会话，返回清理数量
    async fn cleanup_older_than(&self, days: u32) -> Result<usize, StoreError>;

    /// 按最近活动倒序
    async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionMetadata>, StoreError>;

    async fn session_metadata(&self, session_id: &str)
        -> Result<Option<SessionMetadata>, StoreError>;

    async fn export_session(&self, session_id: &str) -> Result<SessionExport, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    user_message TEXT NOT NULL,
    agent_response TEXT NOT NULL,
    agent_used TEXT NOT NULL,
    tools_used TEXT NOT NULL DEFAULT '[]',
    confidence REAL NOT NULL DEFAULT 0,
    routing_confidence REAL NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id);
CREATE INDEX IF NOT EXISTS idx_conversations_timestamp ON conversations(timestamp);
CREATE TABLE IF NOT EXISTS session_metadata (
    session_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    last_activity TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0
);
";

const ENTRY_COLUMNS: &str = "session_id, timestamp, user_message, agent_response, agent_used, \
                             tools_used, confidence, routing_confidence, metadata";

/// 定长 UTC 时间戳，字符串顺序即时间顺序
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationEntry> {
    let timestamp: String = row.get(1)?;
    let tools: String = row.get(5)?;
    let metadata: String = row.get(8)?;
    Ok(ConversationEntry {
        session_id: row.get(0)?,
        timestamp: parse_ts(1, &timestamp)?,
        user_message: row.get(2)?,
        agent_response: row.get(3)?,
        agent_used: row.get(4)?,
        tools_used: serde_json::from_str(&tools).map_err(|e| conversion_err(5, e))?,
        confidence: row.get(6)?,
        routing_confidence: row.get(7)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| conversion_err(8, e))?,
    })
}

fn metadata_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionMetadata> {
    let created: String = row.get(1)?;
    let last: String = row.get(2)?;
    let count: i64 = row.get(3)?;
    Ok(SessionMetadata {
        session_id: row.get(0)?,
        created_at: parse_ts(1, &created)?,
        last_activity: parse_ts(2, &last)?,
        message_count: count.max(0) as u64,
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// 会话 id 转文件名：ASCII 字母数字与 `-` 原样保留，其余字节（包括 `_` 本身）编码为 `_xx`
///
/// 编码是单射的，不同会话永远不会落到同一个日志文件。
pub fn sanitize_session_id(session_id: &str) -> String {
    if session_id.is_empty() {
        return "_".to_string();
    }
    let mut encoded = String::with_capacity(session_id.len());
    for b in session_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            encoded.push(char::from(b));
        } else {
            encoded.push_str(&format!("_{b:02x}"));
        }
    }
    encoded
}

/// SQLite 索引 + 会话 JSON 日志
#[derive(Clone)]
pub struct DurableStore {
    conn: Arc<Mutex<Connection>>,
    sessions_dir: PathBuf,
    max_log_entries: usize,
}

impl DurableStore {
    /// 在 data_dir 下打开（或创建）`conversations.db` 与 `sessions/`
    pub async fn open(data_dir: impl AsRef<Path>, max_log_entries: usize) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let sessions_dir = data_dir.join("sessions");
        tokio::fs::create_dir_all(&sessions_dir).await?;

        let db_path = data_dir.join("conversations.db");
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn = Connection::open(db_path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;

        tracing::info!(dir = %data_dir.display(), "conversation store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            sessions_dir,
            max_log_entries: max_log_entries.max(1),
        })
    }

    pub async fn from_config(cfg: &AppConfig) -> Result<Self, StoreError> {
        Self::open(&cfg.app.data_dir, cfg.memory.max_conversation_history).await
    }

    pub fn session_log_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.json", sanitize_session_id(session_id)))
    }

    /// 在阻塞线程池中持锁执行 SQLite 操作
    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// 行写入与元数据 upsert 在同一事务内
    async fn write_index(&self, entry: &ConversationEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        let tools = serde_json::to_string(&entry.tools_used)?;
        let metadata = serde_json::to_string(&entry.metadata)?;
        self.with_conn(move |conn| {
            let stamp = ts(&entry.timestamp);
            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "INSERT INTO conversations ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    entry.session_id,
                    stamp,
                    entry.user_message,
                    entry.agent_response,
                    entry.agent_used,
                    tools,
                    entry.confidence,
                    entry.routing_confidence,
                    metadata,
                ],
            )?;
            tx.execute(
                "INSERT INTO session_metadata (session_id, created_at, last_activity, message_count)
                 VALUES (?1, ?2, ?2, 1)
                 ON CONFLICT(session_id) DO UPDATE SET
                    message_count = message_count + 1,
                    last_activity = MAX(last_activity, excluded.last_activity)",
                params![entry.session_id, stamp],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn read_log(&self, session_id: &str) -> Result<Vec<ConversationEntry>, StoreError> {
        let raw = tokio::fs::read(self.session_log_path(session_id)).await?;
        let mut entries: Vec<ConversationEntry> = serde_json::from_slice(&raw)?;
        entries.retain(|e| e.session_id == session_id);
        Ok(entries)
    }

    /// 读出旧日志、追加、截断到最近 N 条后整体重写（先写临时文件再 rename）
    async fn append_log(&self, entry: &ConversationEntry) -> Result<(), StoreError> {
        let path = self.session_log_path(&entry.session_id);
        let mut entries = match self.read_log(&entry.session_id).await {
            Ok(entries) => entries,
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(session = %entry.session_id, error = %e, "session log unreadable, rewriting");
                Vec::new()
            }
        };
        entries.push(entry.clone());
        let overflow = entries.len().saturating_sub(self.max_log_entries);
        entries.drain(..overflow);

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&entries)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn recent_from_index(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>, StoreError> {
        let session_id = session_id.to_string();
        let mut rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM conversations WHERE session_id = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![session_id, sql_limit(limit)], entry_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.reverse();
        Ok(rows)
    }

    async fn all_from_index(&self, session_id: &str) -> Result<Vec<ConversationEntry>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM conversations WHERE session_id = ?1
                 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map(params![session_id], entry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[async_trait]
impl ConversationStore for DurableStore {
    async fn persist(&self, entry: &ConversationEntry) -> Result<(), StoreError> {
        let mut failures = Vec::new();
        if let Err(e) = self.write_index(entry).await {
            tracing::error!(session = %entry.session_id, error = %e, "index write failed");
            failures.push(format!("index: {e}"));
        }
        if let Err(e) = self.append_log(entry).await {
            tracing::error!(session = %entry.session_id, error = %e, "session log write failed");
            failures.push(format!("log: {e}"));
        }
        if failures.is_empty() {
            tracing::debug!(session = %entry.session_id, "conversation persisted");
            Ok(())
        } else {
            Err(StoreError::Partial(failures))
        }
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>, StoreError> {
        match self.read_log(session_id).await {
            Ok(entries) => {
                let skip = entries.len().saturating_sub(limit);
                Ok(entries.into_iter().skip(skip).collect())
            }
            Err(e) => {
                tracing::debug!(session = %session_id, error = %e, "session log unavailable, reading index");
                self.recent_from_index(session_id, limit).await
            }
        }
    }

    async fn by_date_range(
        &self,
        session_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ConversationEntry>, StoreError> {
        if start > end {
            return Err(StoreError::Timestamp(format!(
                "range start {} is after end {}",
                ts(&start),
                ts(&end)
            )));
        }
        let session_id = session_id.to_string();
        let (start, end) = (ts(&start), ts(&end));
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM conversations
                 WHERE session_id = ?1 AND timestamp BETWEEN ?2 AND ?3
                 ORDER BY timestamp ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map(params![session_id, start, end], entry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn search(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>, StoreError> {
        let session_id = session_id.to_string();
        let pattern = format!("%{query}%");
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM conversations
                 WHERE session_id = ?1 AND (user_message LIKE ?2 OR agent_response LIKE ?2)
                 ORDER BY timestamp DESC, id DESC LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(params![session_id, pattern, sql_limit(limit)], entry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn statistics(&self, session_id: &str) -> Result<SessionStatistics, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let (total, first, last, avg): (i64, Option<String>, Option<String>, Option<f64>) = conn
                .query_row(
                    "SELECT COUNT(*), MIN(timestamp), MAX(timestamp), AVG(confidence)
                     FROM conversations WHERE session_id = ?1",
                    params![session_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?;

            let mut agent_usage = BTreeMap::new();
            let mut stmt = conn.prepare(
                "SELECT agent_used, COUNT(*) FROM conversations WHERE session_id = ?1 GROUP BY agent_used",
            )?;
            for row in stmt.query_map(params![session_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })? {
                let (agent, count) = row?;
                agent_usage.insert(agent, count.max(0) as u64);
            }

            let mut tool_usage: BTreeMap<String, u64> = BTreeMap::new();
            let mut stmt =
                conn.prepare("SELECT tools_used FROM conversations WHERE session_id = ?1")?;
            for row in stmt.query_map(params![session_id], |row| row.get::<_, String>(0))? {
                let raw = row?;
                match serde_json::from_str::<Vec<String>>(&raw) {
                    Ok(tools) => {
                        for tool in tools {
                            *tool_usage.entry(tool).or_default() += 1;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping malformed tools_used"),
                }
            }

            Ok(SessionStatistics {
                first_message: first.as_deref().map(|s| parse_ts(1, s)).transpose()?,
                last_message: last.as_deref().map(|s| parse_ts(2, s)).transpose()?,
                session_id,
                total_messages: total.max(0) as u64,
                average_confidence: avg.unwrap_or(0.0),
                agent_usage,
                tool_usage,
            })
        })
        .await
    }

    async fn clear_session(&self, session_id: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.session_log_path(session_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let id = session_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM conversations WHERE session_id = ?1", params![id])?;
            tx.execute("DELETE FROM session_metadata WHERE session_id = ?1", params![id])?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        tracing::info!(session = %session_id, "session cleared");
        Ok(())
    }

    async fn cleanup_older_than(&self, days: u32) -> Result<usize, StoreError> {
        let Some(cutoff) = Utc::now().checked_sub_signed(Duration::days(i64::from(days))) else {
            tracing::info!(days, "cutoff predates representable time, nothing to clean");
            return Ok(0);
        };
        let cutoff = ts(&cutoff);
        let stale: Vec<String> = self
            .with_conn(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT session_id FROM session_metadata WHERE last_activity < ?1")?;
                let ids = stmt
                    .query_map(params![cutoff], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await?;

        // 逐个清理，单个失败不影响其余会话
        let mut cleared = 0;
        for id in &stale {
            match self.clear_session(id).await {
                Ok(()) => cleared += 1,
                Err(e) => tracing::warn!(session = %id, error = %e, "cleanup failed for session"),
            }
        }
        tracing::info!(cleared, days, "old sessions cleaned up");
        Ok(cleared)
    }

    async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionMetadata>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, created_at, last_activity, message_count
                 FROM session_metadata ORDER BY last_activity DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![sql_limit(limit)], metadata_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn session_metadata(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionMetadata>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let meta = conn
                .query_row(
                    "SELECT session_id, created_at, last_activity, message_count
                     FROM session_metadata WHERE session_id = ?1",
                    params![session_id],
                    metadata_from_row,
                )
                .optional()?;
            Ok(meta)
        })
        .await
    }

    async fn export_session(&self, session_id: &str) -> Result<SessionExport, StoreError> {
        Ok(SessionExport {
            session_id: session_id.to_string(),
            exported_at: Utc::now(),
            statistics: self.statistics(session_id).await?,
            conversations: self.all_from_index(session_id).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(session: &str, user: &str, agent: &str, tools: &[&str]) -> ConversationEntry {
        ConversationEntry {
            session_id: session.to_string(),
            timestamp: Utc::now(),
            user_message: user.to_string(),
            agent_response: format!("reply to {user}"),
            agent_used: agent.to_string(),
            tools_used: tools.iter().map(|t| t.to_string()).collect(),
            confidence: 0.8,
            routing_confidence: 0.6,
            metadata: Map::new(),
        }
    }

    async fn store(dir: &TempDir, cap: usize) -> DurableStore {
        DurableStore::open(dir.path(), cap).await.unwrap()
    }

    fn messages(entries: &[ConversationEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.user_message.as_str()).collect()
    }

    #[tokio::test]
    async fn test_statistics_after_three_entries() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 100).await;
        store.persist(&entry("s1", "a", "research", &["web_search"])).await.unwrap();
        store.persist(&entry("s1", "b", "code", &["code_exec", "file_ops"])).await.unwrap();
        store.persist(&entry("s1", "c", "research", &["web_search"])).await.unwrap();
        store.persist(&entry("s2", "other", "task", &[])).await.unwrap();

        let stats = store.statistics("s1").await.unwrap();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.agent_usage.values().sum::<u64>(), 3);
        assert_eq!(stats.agent_usage["research"], 2);
        assert_eq!(stats.tool_usage["web_search"], 2);
        assert_eq!(stats.tool_usage["file_ops"], 1);
        assert!((stats.average_confidence - 0.8).abs() < 1e-9);
        assert!(stats.first_message <= stats.last_message);

        let empty = store.statistics("nobody").await.unwrap();
        assert_eq!(empty.total_messages, 0);
        assert!(empty.first_message.is_none());
    }

    #[tokio::test]
    async fn test_metadata_tracks_every_entry() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 100).await;
        let first = entry("s1", "a", "code", &[]);
        store.persist(&first).await.unwrap();
        let second = entry("s1", "b", "code", &[]);
        store.persist(&second).await.unwrap();

        let meta = store.session_metadata("s1").await.unwrap().unwrap();
        assert_eq!(meta.message_count, 2);
        assert!(meta.last_activity >= second.timestamp);
        assert_eq!(meta.created_at, first.timestamp);
        assert!(store.session_metadata("s9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_log_is_truncated_but_index_keeps_all() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 2).await;
        for m in ["a", "b", "c"] {
            store.persist(&entry("s1", m, "task", &[])).await.unwrap();
        }

        assert_eq!(messages(&store.recent("s1", 10).await.unwrap()), vec!["b", "c"]);
        let export = store.export_session("s1").await.unwrap();
        assert_eq!(messages(&export.conversations), vec!["a", "b", "c"]);
        assert_eq!(export.statistics.total_messages, 3);
    }

    #[tokio::test]
    async fn test_recent_falls_back_to_index_when_log_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 100).await;
        for m in ["a", "b", "c"] {
            store.persist(&entry("s/1", m, "task", &[])).await.unwrap();
        }
        let path = store.session_log_path("s/1");
        assert!(path.starts_with(dir.path().join("sessions")));
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let recent = store.recent("s/1", 2).await.unwrap();
        assert_eq!(messages(&recent), vec!["b", "c"]);

        // 下一次写入重建日志
        store.persist(&entry("s/1", "d", "task", &[])).await.unwrap();
        assert_eq!(messages(&store.recent("s/1", 5).await.unwrap()), vec!["d"]);
    }

    #[tokio::test]
    async fn test_search_and_date_range() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 100).await;
        let mut old = entry("s1", "Rust lifetimes", "code", &[]);
        old.timestamp = Utc::now() - Duration::days(3);
        store.persist(&old).await.unwrap();
        store.persist(&entry("s1", "python typing", "code", &[])).await.unwrap();
        store.persist(&entry("s1", "rust macros", "code", &[])).await.unwrap();

        let hits = store.search("s1", "rust", 10).await.unwrap();
        assert_eq!(messages(&hits), vec!["rust macros", "Rust lifetimes"]);
        assert_eq!(store.search("s1", "rust", 1).await.unwrap().len(), 1);
        assert!(store.search("s2", "rust", 10).await.unwrap().is_empty());

        let range = store
            .by_date_range("s1", Utc::now() - Duration::days(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(messages(&range), vec!["python typing", "rust macros"]);

        let inverted = store
            .by_date_range("s1", Utc::now(), Utc::now() - Duration::days(1))
            .await;
        assert!(matches!(inverted, Err(StoreError::Timestamp(_))));
    }

    #[tokio::test]
    async fn test_clear_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 100).await;
        let mut stale = entry("old", "ancient", "research", &[]);
        stale.timestamp = Utc::now() - Duration::days(40);
        store.persist(&stale).await.unwrap();
        store.persist(&entry("fresh", "new", "research", &[])).await.unwrap();
        store.persist(&entry("gone", "bye", "research", &[])).await.unwrap();

        store.clear_session("gone").await.unwrap();
        assert!(!store.session_log_path("gone").exists());
        assert!(store.recent("gone", 5).await.unwrap().is_empty());
        store.clear_session("never-existed").await.unwrap();

        assert_eq!(store.cleanup_older_than(30).await.unwrap(), 1);
        let sessions: Vec<String> = store
            .list_sessions(10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.session_id)
            .collect();
        assert_eq!(sessions, vec!["fresh"]);
        assert_eq!(store.statistics("old").await.unwrap().total_messages, 0);
    }

    #[test]
    fn test_sanitize_session_id() {
        assert_eq!(sanitize_session_id("user-1a"), "user-1a");
        assert_eq!(sanitize_session_id("a_b"), "a_5fb");
        assert_eq!(sanitize_session_id("a/b"), "a_2fb");
        assert_eq!(sanitize_session_id("../etc"), "_2e_2e_2fetc");
        assert_eq!(sanitize_session_id(""), "_");
        assert_ne!(sanitize_session_id("_"), sanitize_session_id(""));
    }

    #[tokio::test]
    async fn test_similar_session_ids_keep_separate_logs() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 100).await;
        store.persist(&entry("a/b", "secret of a/b", "research", &[])).await.unwrap();
        store.persist(&entry("a_b", "mine", "task", &[])).await.unwrap();

        assert_ne!(store.session_log_path("a/b"), store.session_log_path("a_b"));
        assert_eq!(messages(&store.recent("a_b", 10).await.unwrap()), vec!["mine"]);
        assert_eq!(
            messages(&store.recent("a/b", 10).await.unwrap()),
            vec!["secret of a/b"]
        );

        store.clear_session("a_b").await.unwrap();
        assert!(store.session_log_path("a/b").exists());
        assert_eq!(
            messages(&store.recent("a/b", 10).await.unwrap()),
            vec!["secret of a/b"]
        );
    }

    #[tokio::test]
    async fn test_log_entries_from_other_sessions_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 100).await;
        store.persist(&entry("s1", "own", "task", &[])).await.unwrap();

        // 日志文件里混入别的会话的记录
        let mut foreign = entry("s2", "foreign", "task", &[]);
        foreign.timestamp = Utc::now();
        let own = store.read_log("s1").await.unwrap();
        let mixed = vec![foreign, own[0].clone()];
        std::fs::write(store.session_log_path("s1"), serde_json::to_vec(&mixed).unwrap()).unwrap();

        assert_eq!(messages(&store.recent("s1", 10).await.unwrap()), vec!["own"]);
    }

    #[tokio::test]
    async fn test_cleanup_with_huge_age_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 100).await;
        store.persist(&entry("s1", "a", "task", &[])).await.unwrap();

        assert_eq!(store.cleanup_older_than(u32::MAX).await.unwrap(), 0);
        assert_eq!(store.statistics("s1").await.unwrap().total_messages, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sessions_keep_counts_consistent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 100).await;

        let mut handles = Vec::new();
        for s in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let session = format!("s{s}");
                for i in 0..20 {
                    store
                        .persist(&entry(&session, &format!("m{i}"), "task", &[]))
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        for s in 0..4 {
            let session = format!("s{s}");
            let meta = store.session_metadata(&session).await.unwrap().unwrap();
            let stats = store.statistics(&session).await.unwrap();
            assert_eq!(meta.message_count, 20);
            assert_eq!(stats.total_messages, 20);
            assert_eq!(store.recent(&session, 100).await.unwrap().len(), 20);
        }
    }
}
