//! 团队名册：链路开始时按配置招募的角色

use std::collections::BTreeSet;

/// 已招募角色集合
#[derive(Debug, Clone, Default)]
pub struct Roster {
    agents: BTreeSet<String>,
}

impl Roster {
    pub fn recruit(&mut self, agent_name: impl Into<String>) {
        self.agents.insert(agent_name.into());
    }

    pub fn exists(&self, agent_name: &str) -> bool {
        self.agents.contains(agent_name)
    }

    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(String::as_str)
    }

    /// meta.txt 使用的逗号分隔列表
    pub fn summary(&self) -> String {
        self.agents.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}
