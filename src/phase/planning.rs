//! 规划类 Phase：需求分析、语言选择、Product / Sprint Backlog、角色分工、Sprint 回顾

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::core::{EngineContext, EngineError, EnvKey, ProjectState, Result};
use crate::phase::{PhaseEnv, PhaseLogic};

const SPRINT_GOALS: &str = "Sprint Goals:";
const SPRINT_BACKLOG: &str = "Sprint Backlog:";
const ACCEPTANCE_CRITERIA: &str = "Acceptance Criteria:";
const DONE_WORK: &str = "Done Work:";
const UNDONE_WORK: &str = "Undone Work:";
const END_OF_SPRINTS: &str = "DONE.";

fn numbered_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+[.)]?\s*").expect("valid regex"))
}

fn assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Backlog Item: (.*) - Member: (.*)").expect("valid regex"))
}

/// 列表项：以数字或 `-` 开头的行
pub fn is_list_item(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with(|c: char| c.is_ascii_digit()) || trimmed.starts_with('-')
}

fn list_items(text: &str) -> Vec<String> {
    text.lines()
        .filter(|l| is_list_item(l))
        .map(|l| l.trim().to_string())
        .collect()
}

/// Product Backlog 与验收标准（"Acceptance Criteria:" 之后的列表项）
pub fn parse_product_backlog(text: &str) -> (Vec<String>, Vec<String>) {
    match text.split_once(ACCEPTANCE_CRITERIA) {
        Some((backlog, criteria)) => (list_items(backlog), list_items(criteria)),
        None => (list_items(text), Vec::new()),
    }
}

/// 解析出的一个 Sprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SprintPlan {
    pub goals: Vec<String>,
    pub backlog: Vec<String>,
}

impl SprintPlan {
    /// 编号后的编程任务；`-` 开头的子项原样保留
    pub fn programming_task(&self) -> String {
        let mut next = 1;
        let mut lines = Vec::new();
        for item in &self.backlog {
            if item.trim().starts_with('-') {
                lines.push(item.clone());
            } else {
                lines.push(format!("{next}. {item}"));
                next += 1;
            }
        }
        lines.join("\n")
    }
}

/// "Sprint Goals: ... Sprint Backlog: ..." 两段
pub fn parse_sprint_plan(text: &str) -> Option<SprintPlan> {
    let (head, backlog) = text.split_once(SPRINT_BACKLOG)?;
    let goals = head
        .split_once(SPRINT_GOALS)
        .map(|(_, goals)| goals)
        .unwrap_or("")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    let backlog = backlog
        .lines()
        .filter(|l| is_list_item(l))
        .map(|l| {
            let trimmed = l.trim();
            if trimmed.starts_with('-') {
                trimmed.to_string()
            } else {
                numbered_prefix_re().replace(trimmed, "").trim().to_string()
            }
        })
        .filter(|item| !item.is_empty())
        .collect();
    Some(SprintPlan { goals, backlog })
}

/// 结论中单独一行 `DONE.` 表示所有 Sprint 已完成
pub fn signals_end_of_sprints(text: &str) -> bool {
    text.lines().any(|l| l.trim() == END_OF_SPRINTS)
}

fn malformed(phase: &str, reason: &str) -> EngineError {
    EngineError::MalformedConclusion {
        phase: phase.to_string(),
        reason: reason.to_string(),
    }
}

fn install_sprint(state: &mut ProjectState, plan: SprintPlan) {
    state.env.current_programming_task = plan.programming_task();
    state.env.all_sprints.push(plan.backlog.clone());
    state.env.all_sprint_goals.push(plan.goals.join("\n"));
    state.env.current_sprint_goals = plan.goals;
    state.env.current_sprint_backlog = plan.backlog;
    tracing::info!(
        sprint = state.env.all_sprints.len(),
        items = state.env.current_sprint_backlog.len(),
        "sprint backlog installed"
    );
}

const BRIEF: &[EnvKey] = &[
    EnvKey::TaskPrompt,
    EnvKey::Modality,
    EnvKey::Language,
    EnvKey::Ideas,
];

#[derive(Debug, Default)]
pub struct DemandAnalysis;

#[async_trait]
impl PhaseLogic for DemandAnalysis {
    fn reads(&self) -> &'static [EnvKey] {
        &[EnvKey::TaskPrompt]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::Modality]
    }

    fn reflection_question(&self) -> &'static str {
        "Answer their final product modality in the discussion without any other words, e.g., \"PowerPoint\""
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        _env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        if !conclusion.is_empty() {
            state.env.modality = conclusion.to_lowercase().replace('.', "").trim().to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LanguageChoose;

#[async_trait]
impl PhaseLogic for LanguageChoose {
    fn reads(&self) -> &'static [EnvKey] {
        &[EnvKey::TaskPrompt, EnvKey::Modality, EnvKey::Ideas]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::Language]
    }

    fn reflection_question(&self) -> &'static str {
        "Conclude the programming language being discussed for software development, in the format: \"*\" where '*' represents a programming language."
    }

    fn default_conclusion(&self) -> &'static str {
        "Python"
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        _env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        let language = conclusion.trim().trim_end_matches('.').trim();
        state.env.language = if language.is_empty() {
            "Python".to_string()
        } else {
            language.to_string()
        };
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ProductBacklogCreating;

#[async_trait]
impl PhaseLogic for ProductBacklogCreating {
    fn reads(&self) -> &'static [EnvKey] {
        BRIEF
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::ProductBacklog, EnvKey::AcceptanceCriteria]
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        _env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        let (backlog, criteria) = parse_product_backlog(conclusion);
        if backlog.is_empty() && !state.env.product_backlog.is_empty() {
            tracing::warn!("no backlog items parsed, keeping previous product backlog");
            return Ok(());
        }
        tracing::info!(items = backlog.len(), criteria = criteria.len(), "product backlog created");
        state.env.product_backlog = backlog;
        state.env.acceptance_criteria = criteria;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ProductBacklogReview;

#[async_trait]
impl PhaseLogic for ProductBacklogReview {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::ProductBacklog,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::ProductBacklogComments]
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        state.env.product_backlog_comments = conclusion.trim().to_string();
        env.set(
            EnvKey::ProductBacklogComments.placeholder(),
            state.env.product_backlog_comments.clone(),
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ProductBacklogModification;

#[async_trait]
impl PhaseLogic for ProductBacklogModification {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::ProductBacklog,
            EnvKey::ProductBacklogComments,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::ProductBacklog]
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        _env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        let items = list_items(conclusion);
        if items.is_empty() {
            return Err(malformed("ProductBacklogModification", "no backlog items"));
        }
        state.env.product_backlog = items;
        Ok(())
    }
}

/// 首个 Sprint 与后续 Sprint 的 Backlog 生成
#[derive(Debug, Default)]
pub struct SprintBacklogCreating {
    /// 后续 Sprint：读取已完成 / 未完成工作，并识别 `DONE.` 结束标记
    pub next: bool,
}

impl SprintBacklogCreating {
    pub fn first() -> Self {
        Self { next: false }
    }

    pub fn following() -> Self {
        Self { next: true }
    }

    fn phase_name(&self) -> &'static str {
        if self.next {
            "NextSprintBacklogCreating"
        } else {
            "SprintBacklogCreating"
        }
    }
}

#[async_trait]
impl PhaseLogic for SprintBacklogCreating {
    fn reads(&self) -> &'static [EnvKey] {
        if self.next {
            &[
                EnvKey::TaskPrompt,
                EnvKey::Modality,
                EnvKey::Language,
                EnvKey::Ideas,
                EnvKey::ProductBacklog,
                EnvKey::DoneWork,
                EnvKey::UndoneWork,
            ]
        } else {
            &[
                EnvKey::TaskPrompt,
                EnvKey::Modality,
                EnvKey::Language,
                EnvKey::Ideas,
                EnvKey::ProductBacklog,
            ]
        }
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[
            EnvKey::SprintGoals,
            EnvKey::SprintBacklog,
            EnvKey::ProgrammingTask,
            EnvKey::EndSprint,
        ]
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        _env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        if self.next && signals_end_of_sprints(conclusion) {
            tracing::info!("all sprints finished");
            state.env.end_sprint = true;
            return Ok(());
        }
        let plan = parse_sprint_plan(conclusion)
            .ok_or_else(|| malformed(self.phase_name(), "missing \"Sprint Backlog:\" section"))?;
        install_sprint(state, plan);
        state.artifacts.start_sprint();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SprintBacklogReview;

#[async_trait]
impl PhaseLogic for SprintBacklogReview {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::ProductBacklog,
            EnvKey::SprintGoals,
            EnvKey::ProgrammingTask,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::SprintBacklogComments]
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        state.env.sprint_backlog_comments = conclusion.trim().to_string();
        env.set(
            EnvKey::SprintBacklogComments.placeholder(),
            state.env.sprint_backlog_comments.clone(),
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SprintBacklogModification;

#[async_trait]
impl PhaseLogic for SprintBacklogModification {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::ProductBacklog,
            EnvKey::ProductBacklogComments,
            EnvKey::SprintGoals,
            EnvKey::ProgrammingTask,
            EnvKey::SprintBacklogComments,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::SprintGoals, EnvKey::SprintBacklog, EnvKey::ProgrammingTask]
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        _env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        let plan = parse_sprint_plan(conclusion).ok_or_else(|| {
            malformed("SprintBacklogModification", "missing \"Sprint Backlog:\" section")
        })?;
        if plan.backlog.is_empty() {
            return Err(malformed("SprintBacklogModification", "empty sprint backlog"));
        }
        // 修改替换的是当前 Sprint，而不是追加一个新 Sprint
        state.env.all_sprints.pop();
        state.env.all_sprint_goals.pop();
        install_sprint(state, plan);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RolesEngagement;

#[async_trait]
impl PhaseLogic for RolesEngagement {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::Ideas,
            EnvKey::SprintGoals,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::AssignedTasks, EnvKey::ProgrammingTask]
    }

    async fn prepare(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
    ) -> Result<Option<String>> {
        let plain = state
            .env
            .current_sprint_backlog
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {item}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        env.set("plain_sprint_backlog", plain);
        Ok(None)
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        _env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        let assigned: Vec<(String, String)> = conclusion
            .lines()
            .filter_map(|line| assignment_re().captures(line))
            .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
            .collect();
        if assigned.is_empty() {
            tracing::warn!("no task assignments parsed, keeping current programming task");
            return Ok(());
        }
        state.env.current_programming_task = assigned
            .iter()
            .enumerate()
            .map(|(i, (item, _))| format!("{}. {item}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        state.env.current_assigned_tasks = assigned;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SprintReview;

#[async_trait]
impl PhaseLogic for SprintReview {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Ideas,
            EnvKey::Language,
            EnvKey::Codes,
            EnvKey::SprintGoals,
            EnvKey::ProgrammingTask,
            EnvKey::TestReports,
            EnvKey::ErrorSummary,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::DoneWork, EnvKey::UndoneWork]
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        _env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        let (head, undone) = conclusion
            .split_once(UNDONE_WORK)
            .ok_or_else(|| malformed("SprintReview", "missing \"Undone Work:\" section"))?;
        let (_, done) = head
            .split_once(DONE_WORK)
            .ok_or_else(|| malformed("SprintReview", "missing \"Done Work:\" section"))?;
        tracing::info!(done = %done.trim(), undone = %undone.trim(), "sprint reviewed");
        state.env.done_works.push(done.trim().to_string());
        state.env.undone_works.push(undone.trim().to_string());
        Ok(())
    }
}
