//! 诊断计数：记录每种定位启发式在一次运行中触发的次数，结束时写入 diagnostics.json

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::Result;

/// 启发式类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heuristic {
    FileSystemError,
    ClassLookup,
    TestCase,
    ModuleError,
    AttributeError,
    TypeError,
    OtherError,
    DependencyGraphQuery,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub file_system_error: u64,
    pub class_lookup: u64,
    pub test_case: u64,
    pub module_error: u64,
    pub attribute_error: u64,
    pub type_error: u64,
    pub other_error: u64,
    pub dependency_graph_query: u64,
}

impl Diagnostics {
    pub fn hit(&mut self, heuristic: Heuristic) {
        let slot = match heuristic {
            Heuristic::FileSystemError => &mut self.file_system_error,
            Heuristic::ClassLookup => &mut self.class_lookup,
            Heuristic::TestCase => &mut self.test_case,
            Heuristic::ModuleError => &mut self.module_error,
            Heuristic::AttributeError => &mut self.attribute_error,
            Heuristic::TypeError => &mut self.type_error,
            Heuristic::OtherError => &mut self.other_error,
            Heuristic::DependencyGraphQuery => &mut self.dependency_graph_query,
        };
        *slot += 1;
    }

    /// 扇出合并时累加子任务的计数
    pub fn absorb(&mut self, other: &Diagnostics, base: &Diagnostics) {
        self.file_system_error += other.file_system_error.saturating_sub(base.file_system_error);
        self.class_lookup += other.class_lookup.saturating_sub(base.class_lookup);
        self.test_case += other.test_case.saturating_sub(base.test_case);
        self.module_error += other.module_error.saturating_sub(base.module_error);
        self.attribute_error += other.attribute_error.saturating_sub(base.attribute_error);
        self.type_error += other.type_error.saturating_sub(base.type_error);
        self.other_error += other.other_error.saturating_sub(base.other_error);
        self.dependency_graph_query += other
            .dependency_graph_query
            .saturating_sub(base.dependency_graph_query);
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
