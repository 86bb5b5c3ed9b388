//! 工具注册表
//!
//! 工具由 Agent 调用（编排层只汇总工具名，不解释返回内容）。所有工具实现 Tool trait，
//! execute 接收命名参数（JSON 对象），返回一个 map；map 中出现 `"error"` 键即表示失败。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// 工具 trait：名称、描述、触发关键词、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（记录在 tools_used 中）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 提示该工具相关的关键词，Agent 的能力评分会参考
    fn keywords(&self) -> &[&str] {
        &[]
    }

    async fn execute(&self, args: Value) -> Map<String, Value>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 未注册的工具返回带 error 的 map，与工具自身失败的表现一致
    pub async fn execute(&self, name: &str, args: Value) -> Map<String, Value> {
        match self.tools.get(name) {
            Some(tool) => tool.execute(args).await,
            None => error_map(format!("Tool '{name}' not available")),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// 构造 `{"error": msg}`
pub fn error_map(msg: impl Into<String>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("error".to_string(), Value::String(msg.into()));
    map
}
