//! 项目状态：所有 Phase 共享的类型化黑板
//!
//! ProjectState 取代字符串键的全局字典：每个 Phase 通过 [`EnvKey`] 声明读写哪些字段，
//! 运行时按声明自动填充占位符，并在每次应用结论后递增 revision。

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use crate::artifacts::{ArtifactStore, DocumentStore, StoreThresholds};
use crate::core::{EngineError, Result, Roster};
use crate::graph::DependencyGraph;
use crate::observability::Diagnostics;
use crate::testing::{ErrorCategory, TestTarget};

/// 黑板字段标识：Phase 的 reads / writes 声明与占位符名均来自这里
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnvKey {
    TaskPrompt,
    Modality,
    Ideas,
    Language,
    Codes,
    ReviewComments,
    ErrorSummary,
    TestReports,
    ProductBacklog,
    AcceptanceCriteria,
    ProductBacklogComments,
    SprintBacklogComments,
    SprintGoals,
    SprintBacklog,
    ProgrammingTask,
    AssignedTasks,
    DoneWork,
    UndoneWork,
    RawCodeConclusion,
    TestingCommands,
    EndSprint,
    ExistBugs,
    Requirements,
    Manual,
}

impl EnvKey {
    /// 模板里的占位符名，如 `{task}`
    pub fn placeholder(self) -> &'static str {
        match self {
            EnvKey::TaskPrompt => "task",
            EnvKey::Modality => "modality",
            EnvKey::Ideas => "ideas",
            EnvKey::Language => "language",
            EnvKey::Codes => "codes",
            EnvKey::ReviewComments => "comments",
            EnvKey::ErrorSummary => "error_summary",
            EnvKey::TestReports => "test_reports",
            EnvKey::ProductBacklog => "plain_product_backlog",
            EnvKey::AcceptanceCriteria => "acceptance_criteria",
            EnvKey::ProductBacklogComments => "product_backlog_comments",
            EnvKey::SprintBacklogComments => "sprint_backlog_comments",
            EnvKey::SprintGoals => "current_sprint_goals",
            EnvKey::SprintBacklog => "current_programming_task",
            EnvKey::ProgrammingTask => "current_programming_task",
            EnvKey::AssignedTasks => "current_assigned_tasks",
            EnvKey::DoneWork => "done_works",
            EnvKey::UndoneWork => "undone_works",
            EnvKey::RawCodeConclusion => "raw_code_conclusion",
            EnvKey::TestingCommands => "testing_commands",
            EnvKey::EndSprint => "end_sprint",
            EnvKey::ExistBugs => "exist_bugs",
            EnvKey::Requirements => "requirements",
            EnvKey::Manual => "manual",
        }
    }
}

/// 黑板：任务描述、语言、backlog、sprint 进度、测试报告等
#[derive(Debug, Clone, Default)]
pub struct Blackboard {
    pub task_prompt: String,
    pub modality: String,
    pub ideas: String,
    pub language: String,
    pub review_comments: String,
    pub error_summary: String,
    pub test_reports: String,
    pub error_category: Option<ErrorCategory>,
    pub product_backlog: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub product_backlog_comments: String,
    pub sprint_backlog_comments: String,
    pub all_sprints: Vec<Vec<String>>,
    pub all_sprint_goals: Vec<String>,
    pub current_sprint_goals: Vec<String>,
    pub current_sprint_backlog: Vec<String>,
    pub current_programming_task: String,
    pub current_assigned_tasks: Vec<(String, String)>,
    pub done_works: Vec<String>,
    pub undone_works: Vec<String>,
    pub raw_code_conclusion: String,
    /// None 表示本轮尚未推导测试命令；Some(空) 表示队列已耗尽
    pub testing_commands: Option<VecDeque<TestTarget>>,
    pub end_sprint: bool,
    pub exist_bugs: bool,
}

/// 项目级开关（来自 [engine] 配置）
#[derive(Debug, Clone, Default)]
pub struct ProjectSettings {
    pub clear_structure: bool,
    pub git_management: bool,
    pub gui_design: bool,
}

#[derive(Debug, Clone)]
pub struct ProjectState {
    directory: Option<PathBuf>,
    pub settings: ProjectSettings,
    pub artifacts: ArtifactStore,
    pub requirements: DocumentStore,
    pub manuals: DocumentStore,
    pub dependency_graph: DependencyGraph,
    /// 源文件 -> 覆盖它的测试文件；一次运行内只增不减
    pub test_file_map: BTreeMap<String, Vec<String>>,
    pub env: Blackboard,
    pub roster: Roster,
    pub diagnostics: Diagnostics,
    /// 已尝试安装过的外部模块名，避免反复安装
    pub attempted_installs: BTreeSet<String>,
    revision: u64,
}

impl ProjectState {
    pub fn new(settings: ProjectSettings, thresholds: StoreThresholds) -> Self {
        Self {
            directory: None,
            settings,
            artifacts: ArtifactStore::new(thresholds),
            requirements: DocumentStore::new("requirements.txt"),
            manuals: DocumentStore::new("manual.md"),
            dependency_graph: DependencyGraph::default(),
            test_file_map: BTreeMap::new(),
            env: Blackboard::default(),
            roster: Roster::default(),
            diagnostics: Diagnostics::default(),
            attempted_installs: BTreeSet::new(),
            revision: 0,
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// 已初始化的项目目录；未设置时返回配置错误
    pub fn require_directory(&self) -> Result<&Path> {
        self.directory
            .as_deref()
            .ok_or_else(|| EngineError::Config("project directory not set".to_string()))
    }

    /// 只允许设置一次
    pub fn set_directory(&mut self, directory: impl Into<PathBuf>) -> Result<()> {
        if let Some(existing) = &self.directory {
            return Err(EngineError::DirectoryAlreadySet(
                existing.display().to_string(),
            ));
        }
        let directory = directory.into();
        if directory.as_os_str().is_empty() {
            return Err(EngineError::Config("project directory must not be empty".to_string()));
        }
        self.directory = Some(directory);
        Ok(())
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }

    /// 全量重建依赖图（每次成功落盘后调用）
    pub fn rebuild_graph(&mut self) {
        self.dependency_graph = DependencyGraph::build(&self.artifacts);
    }

    /// 写盘并重建依赖图；未设置目录时只重建图
    pub async fn flush_artifacts(&mut self) -> Result<()> {
        if let Some(directory) = self.directory.clone() {
            self.artifacts
                .flush_to_disk(&directory, self.settings.git_management)
                .await?;
        }
        self.rebuild_graph();
        Ok(())
    }

    /// 记录 source 对应的测试文件（去重、保序）
    pub fn record_tests(&mut self, source: &str, tests: impl IntoIterator<Item = String>) {
        let entry = self.test_file_map.entry(source.to_string()).or_default();
        for test in tests {
            if !entry.contains(&test) {
                entry.push(test);
            }
        }
    }

    /// 按 EnvKey 读取黑板值，渲染为占位符文本
    pub fn read(&self, key: EnvKey) -> String {
        let env = &self.env;
        match key {
            EnvKey::TaskPrompt => env.task_prompt.clone(),
            EnvKey::Modality => env.modality.clone(),
            EnvKey::Ideas => env.ideas.clone(),
            EnvKey::Language => env.language.clone(),
            EnvKey::Codes => self.artifacts.render(Default::default()),
            EnvKey::ReviewComments => env.review_comments.clone(),
            EnvKey::ErrorSummary => env.error_summary.clone(),
            EnvKey::TestReports => env.test_reports.clone(),
            EnvKey::ProductBacklog => env.product_backlog.join("\n"),
            EnvKey::AcceptanceCriteria => env.acceptance_criteria.join("\n"),
            EnvKey::ProductBacklogComments => env.product_backlog_comments.clone(),
            EnvKey::SprintBacklogComments => env.sprint_backlog_comments.clone(),
            EnvKey::SprintGoals => env.current_sprint_goals.join("\n"),
            EnvKey::SprintBacklog | EnvKey::ProgrammingTask => {
                env.current_programming_task.clone()
            }
            EnvKey::AssignedTasks => env
                .current_assigned_tasks
                .iter()
                .map(|(item, member)| format!("Backlog Item: {item} - Member: {member}"))
                .collect::<Vec<_>>()
                .join("\n"),
            EnvKey::DoneWork => env.done_works.join("\n"),
            EnvKey::UndoneWork => env.undone_works.join("\n"),
            EnvKey::RawCodeConclusion => env.raw_code_conclusion.clone(),
            EnvKey::TestingCommands => env
                .testing_commands
                .as_ref()
                .map(|queue| {
                    queue
                        .iter()
                        .map(|t| t.to_string())
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default(),
            EnvKey::EndSprint => env.end_sprint.to_string(),
            EnvKey::ExistBugs => env.exist_bugs.to_string(),
            EnvKey::Requirements => self.requirements.content().to_string(),
            EnvKey::Manual => self.manuals.content().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ProjectState {
        ProjectState::new(ProjectSettings::default(), StoreThresholds::default())
    }

    #[test]
    fn test_directory_is_set_once() {
        let mut s = state();
        assert!(s.directory().is_none());
        s.set_directory("/tmp/proj_a").unwrap();
        let err = s.set_directory("/tmp/proj_b").unwrap_err();
        assert!(matches!(err, EngineError::DirectoryAlreadySet(_)));
        assert_eq!(s.directory().unwrap(), Path::new("/tmp/proj_a"));
    }

    #[test]
    fn test_empty_directory_rejected() {
        let mut s = state();
        assert!(s.set_directory("").is_err());
        assert!(s.directory().is_none());
    }

    #[test]
    fn test_record_tests_accumulates_without_duplicates() {
        let mut s = state();
        s.record_tests("helper.py", vec!["test_helper.py".to_string()]);
        s.record_tests(
            "helper.py",
            vec!["test_helper.py".to_string(), "test_helper_extra.py".to_string()],
        );
        assert_eq!(
            s.test_file_map["helper.py"],
            vec!["test_helper.py".to_string(), "test_helper_extra.py".to_string()]
        );
    }

    #[test]
    fn test_read_assigned_tasks() {
        let mut s = state();
        s.env
            .current_assigned_tasks
            .push(("Login page".to_string(), "Alice".to_string()));
        assert_eq!(
            s.read(EnvKey::AssignedTasks),
            "Backlog Item: Login page - Member: Alice"
        );
    }
}
