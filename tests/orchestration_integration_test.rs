//! 编排集成测试：默认 Agent + Mock LLM + 临时目录中的持久化存储

use std::sync::Arc;

use conductor::agents::build_default_registry;
use conductor::config::AppConfig;
use conductor::llm::{FailingLlmClient, MockLlmClient};
use conductor::memory::{ConversationStore, DurableStore};
use conductor::Coordinator;
use tempfile::TempDir;

async fn open_store(dir: &TempDir) -> Arc<DurableStore> {
    Arc::new(DurableStore::open(dir.path(), 100).await.unwrap())
}

fn coordinator(store: Arc<DurableStore>, session: &str) -> Coordinator {
    let registry = build_default_registry(Arc::new(MockLlmClient), None);
    Coordinator::new(&AppConfig::default(), registry, store)
        .unwrap()
        .with_session_id(session)
}

#[tokio::test]
async fn test_conversation_is_persisted_to_both_paths() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let mut c = coordinator(store.clone(), "integration");

    let first = c.process("debug this python function", None, None).await;
    assert_eq!(first.agent_used, "code");
    assert!(first.content.starts_with("Mock response to:"));
    c.process("what is the population of Tokyo", None, None).await;
    c.process("hello there", Some("task"), None).await;

    let history = c.history(10).await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].user_message, "debug this python function");
    assert_eq!(history[2].agent_used, "task");

    let stats = store.statistics("integration").await.unwrap();
    assert_eq!(stats.total_messages, 3);
    assert_eq!(stats.agent_usage["task"], 1);

    let log = std::fs::read_to_string(store.session_log_path("integration")).unwrap();
    let logged: Vec<serde_json::Value> = serde_json::from_str(&log).unwrap();
    assert_eq!(logged.len(), 3);

    let status = c.system_status().await;
    assert_eq!(status.total_messages, 3);
    assert_eq!(status.memory_usage, 3);
    assert!(status.error.is_none());
}

#[tokio::test]
async fn test_history_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let mut c = coordinator(open_store(&dir).await, "restart");
        c.process("plan my week", None, None).await;
    }

    let c = coordinator(open_store(&dir).await, "restart");
    let history = c.history(5).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].user_message, "plan my week");

    let patterns = c.routing_patterns(10).await.unwrap();
    assert_eq!(patterns.total_messages, 1);
}

#[tokio::test]
async fn test_collaboration_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mut c = coordinator(open_store(&dir).await, "collab");

    let resp = c
        .process("Research and write an article about honey bees", None, None)
        .await;
    assert_eq!(resp.metadata["collaboration_used"], true);
    assert!(resp.content.starts_with("Mock response to: Synthesize information"));
    assert!(!resp.content.is_empty());
}

#[tokio::test]
async fn test_llm_outage_still_answers() {
    let dir = TempDir::new().unwrap();
    let registry = build_default_registry(Arc::new(FailingLlmClient), None);
    let mut c = Coordinator::new(&AppConfig::default(), registry, open_store(&dir).await)
        .unwrap()
        .with_session_id("outage");

    let resp = c.process("write a poem", None, None).await;
    assert_eq!(resp.confidence, 0.1);
    assert!(resp.content.starts_with("I apologize"));
    assert_eq!(c.history(5).await.len(), 1);
}

#[tokio::test]
async fn test_clear_history_removes_session() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let mut c = coordinator(store.clone(), "clear-me");
    c.process("find facts about Mars", None, None).await;

    c.clear_history().await;
    assert!(c.history(5).await.is_empty());
    assert!(!store.session_log_path("clear-me").exists());
    assert!(c.memory().get("research").map(|m| m.is_empty()).unwrap_or(true));
}
