//! 每个 Agent 名一份 ConversationMemory
//!
//! 首次访问时按配置容量懒创建；各 Agent 的记忆互相独立。

use std::collections::BTreeMap;

use crate::memory::{ConversationMemory, MemorySnapshot, MemoryStats};

#[derive(Debug, Clone)]
pub struct MemoryBank {
    capacity: usize,
    memories: BTreeMap<String, ConversationMemory>,
}

impl MemoryBank {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            memories: BTreeMap::new(),
        }
    }

    pub fn get(&self, agent: &str) -> Option<&ConversationMemory> {
        self.memories.get(agent)
    }

    pub fn get_or_create(&mut self, agent: &str) -> &mut ConversationMemory {
        let capacity = self.capacity;
        self.memories
            .entry(agent.to_string())
            .or_insert_with(|| ConversationMemory::new(agent, capacity))
    }

    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.memories.keys().map(String::as_str)
    }

    pub fn stats(&self) -> BTreeMap<String, MemoryStats> {
        self.memories
            .iter()
            .map(|(name, memory)| (name.clone(), memory.stats()))
            .collect()
    }

    pub fn export_all(&self) -> BTreeMap<String, MemorySnapshot> {
        self.memories
            .iter()
            .map(|(name, memory)| (name.clone(), memory.export()))
            .collect()
    }

    /// 按 Agent 名整体替换对应记忆
    pub fn import_all(&mut self, snapshots: BTreeMap<String, MemorySnapshot>) {
        for (name, snapshot) in snapshots {
            self.get_or_create(&name).import(snapshot);
        }
    }

    pub fn clear_all(&mut self) {
        for memory in self.memories.values_mut() {
            memory.clear();
        }
    }
}
