//! 版本化关键词权重表（agent → keyword → weight）
//!
//! 由配置提供，每命中一个关键词累加其权重，单个 Agent 的关键词得分封顶 1.0。

use std::collections::BTreeMap;

use crate::config::KeywordTableSection;

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordTable {
    version: u32,
    /// 关键词统一存小写
    agents: BTreeMap<String, Vec<(String, f64)>>,
}

impl KeywordTable {
    pub fn from_config(section: &KeywordTableSection) -> Self {
        let agents = section
            .agents
            .iter()
            .map(|(agent, words)| {
                let words = words
                    .iter()
                    .map(|w| (w.keyword.to_lowercase(), w.weight.max(0.0)))
                    .collect();
                (agent.clone(), words)
            })
            .collect();
        Self {
            version: section.version,
            agents,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// 表中没有该 Agent 时得分为 0
    pub fn score(&self, agent: &str, message_lower: &str) -> f64 {
        self.agents
            .get(agent)
            .map(|words| {
                words
                    .iter()
                    .filter(|(k, _)| message_lower.contains(k.as_str()))
                    .map(|(_, w)| w)
                    .sum::<f64>()
                    .min(1.0)
            })
            .unwrap_or(0.0)
    }

    /// 命中的关键词
    pub fn matches(&self, agent: &str, message: &str) -> Vec<String> {
        let lower = message.to_lowercase();
        self.agents
            .get(agent)
            .map(|words| {
                words
                    .iter()
                    .filter(|(k, _)| lower.contains(k.as_str()))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::from_config(&KeywordTableSection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeywordWeight;

    #[test]
    fn test_increment_and_cap() {
        let table = KeywordTable::default();
        assert!((table.score("code", "python code") - 0.2).abs() < 1e-9);
        assert_eq!(table.score("unknown", "anything"), 0.0);

        let mut section = KeywordTableSection::default();
        section.agents.insert(
            "heavy".to_string(),
            vec![
                KeywordWeight { keyword: "Alpha".to_string(), weight: 0.8 },
                KeywordWeight { keyword: "beta".to_string(), weight: 0.8 },
            ],
        );
        let table = KeywordTable::from_config(&section);
        assert_eq!(table.score("heavy", "alpha beta"), 1.0);
        assert_eq!(table.matches("heavy", "ALPHA only"), vec!["alpha"]);
    }
}
