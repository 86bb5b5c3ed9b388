//! Conductor - 多智能体编排命令行
//!
//! 入口：初始化日志、加载配置、打开持久化存储，然后逐行读取标准输入交给协调器处理。
//! `@agent 消息` 显式指定 Agent；`/status`、`/history`、`/agents`、`/clear`、`/quit` 为内置命令。

use std::sync::Arc;

use anyhow::Context;
use conductor::{
    agents::build_default_registry,
    config::{load_config, AppConfig},
    llm::create_llm_from_config,
    memory::DurableStore,
    observability,
    tools::{ToolExecutor, ToolRegistry},
    Coordinator,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    });

    let store = DurableStore::from_config(&cfg)
        .await
        .context("Failed to open conversation store")?;
    let llm = create_llm_from_config(&cfg);
    let tools = ToolExecutor::new(ToolRegistry::new(), cfg.tools.tool_timeout_secs);
    let registry = build_default_registry(llm, Some(tools));

    let mut coordinator = Coordinator::new(&cfg, registry, Arc::new(store))
        .context("Failed to create coordinator")?;
    println!("session {}", coordinator.session_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/status" => {
                let status = coordinator.system_status().await;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            "/history" => {
                for entry in coordinator.history(10).await {
                    println!("[{}] {}: {}", entry.agent_used, entry.user_message, entry.agent_response);
                }
            }
            "/agents" => {
                for agent in coordinator.agents() {
                    let tags: Vec<&str> = agent.capability_tags.iter().map(String::as_str).collect();
                    println!("{}: {}", agent.name, tags.join(", "));
                }
            }
            "/clear" => coordinator.clear_history().await,
            _ => {
                let response = match line.strip_prefix('@').and_then(|rest| rest.split_once(' ')) {
                    Some((agent, message)) => coordinator.hand_off(agent, message, None).await,
                    None => coordinator.process(line, None, None).await,
                };
                println!(
                    "[{} {:.2}] {}",
                    response.agent_used, response.confidence, response.content
                );
            }
        }
    }

    Ok(())
}
