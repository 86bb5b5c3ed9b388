//! 记忆：每个 Agent 的有界对话记忆 + 跨进程的持久化对话存储

pub mod bank;
pub mod context;
pub mod store;

pub use bank::MemoryBank;
pub use context::{
    ContextEntry, ConversationMemory, ConversationMode, ConversationState, MemoryMetadata,
    MemorySnapshot, MemoryStats, Preference, RelevantEntry, TopicRecord,
};
pub use store::{
    sanitize_session_id, ConversationEntry, ConversationStore, DurableStore, SessionExport,
    SessionMetadata, SessionStatistics,
};
