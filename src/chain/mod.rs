//! 链路驱动：前置处理、前缀 / sprint 循环 / 后缀三段执行、后置处理
//!
//! 链路分为三段：
//! - `chain[..sprint_index]` 依次执行一次
//! - `chain[sprint_index]` 作为一个 sprint 反复执行，直到 `end_sprint` 或达到 `max_sprints`
//! - 其余项依次执行一次
//!
//! 每个链路项使用全新的 [`PhaseEnv`]；项目状态贯穿整条链路。

pub mod workspace;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use crate::chat::{ChatRequest, Message, RoleSpec, INFO_MARKER};
use crate::composed::run_item;
use crate::config::{AppConfig, ChainItem, CompanyConfig, ProjectSection};
use crate::core::{EngineContext, ProjectState, Result};
use crate::phase::{PhaseBook, PhaseEnv, PhaseRegistry, REFLECTION_ASSISTANT, REFLECTION_USER};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const PROMPT_ENGINEER: &str = "Prompt Engineer";
const PROMPT_ENGINEER_PROMPT: &str = "You are an professional prompt engineer that can improve user input prompt to make LLM better understand these prompts.";
const PROMPT_USER: &str = "User";
const PROMPT_USER_PROMPT: &str = "You are an user that want to use LLM to build software.";
const IMPROVE_TEMPLATE: &str = "I will give you a short description of a software design requirement, \
please rewrite it into a detailed prompt that can make large language model know how to make this software better based this prompt, \
the prompt should ensure LLMs build a software that can be run correctly, which is the most import part you need to consider. \
remember that the revised prompt should not contain more than 200 words, \
here is the short description:\"{task}\". \
If the revised prompt is revised_version_of_the_description, \
then you should return a message in a format like \"<INFO> revised_version_of_the_description\", do not return messages in other formats.";

/// 取最后一个 `<INFO>` 之后的文本，小写并去除首尾空白
pub fn improved_task(reply: &str) -> String {
    reply
        .rsplit(INFO_MARKER)
        .next()
        .unwrap_or(reply)
        .trim()
        .to_lowercase()
}

pub struct ChatChain {
    project: ProjectSection,
    company: CompanyConfig,
    ctx: EngineContext,
    book: PhaseBook,
    state: ProjectState,
    timestamp: String,
}

impl ChatChain {
    /// 使用内置 Phase 注册表；链路在任何对话之前整体校验
    pub fn new(app: &AppConfig, company: CompanyConfig, ctx: EngineContext) -> Result<Self> {
        Self::with_registry(app, company, ctx, &PhaseRegistry::builtin())
    }

    pub fn with_registry(
        app: &AppConfig,
        company: CompanyConfig,
        ctx: EngineContext,
        registry: &PhaseRegistry,
    ) -> Result<Self> {
        let book = PhaseBook::build(&company, registry)?;
        let ctx = ctx
            .with_engine(app.engine.clone())
            .with_testing(app.testing.clone());
        let mut state = ProjectState::new(app.engine.project_settings(), app.artifacts.thresholds());
        for agent in &company.chain.recruitments {
            state.roster.recruit(agent.clone());
        }
        state.roster.recruit(REFLECTION_ASSISTANT);
        state.roster.recruit(REFLECTION_USER);
        tracing::info!(roster = %state.roster.summary(), "team recruited");

        Ok(Self {
            project: app.project.clone(),
            company,
            ctx,
            book,
            state,
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        })
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn into_state(self) -> ProjectState {
        self.state
    }

    /// 本次运行的项目目录
    pub fn project_directory(&self) -> PathBuf {
        workspace::project_directory(
            &self.project.warehouse,
            &self.project.name,
            &self.project.org,
            &self.timestamp,
        )
    }

    /// 准备项目目录并确定最终任务描述
    pub async fn pre_processing(&mut self, task: &str) -> Result<PathBuf> {
        let clear_structure = self.ctx.engine.clear_structure;
        if clear_structure {
            workspace::sweep_warehouse(&self.project.warehouse)?;
        }

        let directory = self.project_directory();
        self.state.set_directory(directory.clone())?;
        workspace::prepare_directory(&directory, clear_structure, &self.timestamp)?;
        if !clear_structure && directory.is_dir() {
            if let Ok(loaded) = self.state.artifacts.load_from_disk(&directory) {
                self.state.rebuild_graph();
                tracing::info!(loaded, "continuing from existing sources");
            }
        }
        workspace::record_inputs(&directory, &self.company.files(), &self.project.name, task)?;

        tracing::info!(
            directory = %directory.display(),
            project = %self.project.name,
            org = %self.project.org,
            timestamp = %self.timestamp,
            company = %self.company.directory.display(),
            settings = ?self.state.settings,
            "pre-processing done"
        );

        self.state.env.task_prompt = if self.ctx.engine.self_improve {
            self.self_improve(task).await?
        } else {
            task.to_string()
        };
        Ok(directory)
    }

    /// 由 Prompt Engineer 单轮改写任务描述
    async fn self_improve(&self, task: &str) -> Result<String> {
        let assistant = RoleSpec::new(PROMPT_ENGINEER, PROMPT_ENGINEER_PROMPT);
        let user = RoleSpec::new(PROMPT_USER, PROMPT_USER_PROMPT);
        let prompt = IMPROVE_TEMPLATE.replace("{task}", task);
        let transcript = [Message::user(prompt).from_speaker(PROMPT_USER)];
        let placeholders = BTreeMap::new();
        let reply = self
            .ctx
            .chat
            .step(ChatRequest {
                phase: "TaskImprovement",
                assistant: &assistant,
                user: &user,
                transcript: &transcript,
                placeholders: &placeholders,
                single_turn: true,
            })
            .await?;
        let improved = improved_task(&reply.assistant);
        tracing::info!(original = %task, improved = %improved, "task prompt improved");
        Ok(improved)
    }

    async fn run_items(&mut self, items: &[ChainItem]) -> Result<()> {
        for item in items {
            let mut env = PhaseEnv::default();
            run_item(item, &self.ctx, &self.book, &mut self.state, &mut env).await?;
        }
        Ok(())
    }

    /// 前缀、sprint 循环、后缀
    pub async fn execute_chain(&mut self) -> Result<()> {
        let chain = self.company.chain.chain.clone();
        let sprint_index = self.ctx.engine.sprint_index;
        let Some(sprint) = chain.get(sprint_index) else {
            tracing::warn!(sprint_index, items = chain.len(), "no sprint item, running chain once");
            return self.run_items(&chain).await;
        };

        self.run_items(&chain[..sprint_index]).await?;
        for round in 0..self.ctx.engine.max_sprints {
            if self.state.env.end_sprint {
                tracing::info!(sprints = round, "all sprints done");
                break;
            }
            tracing::info!(sprint = round + 1, phase = %sprint.phase(), "sprint started");
            let mut env = PhaseEnv::default();
            run_item(sprint, &self.ctx, &self.book, &mut self.state, &mut env).await?;
        }
        self.run_items(&chain[sprint_index + 1..]).await
    }

    /// 写 meta.txt 与 diagnostics.json，按需清理 `__pycache__`
    pub fn post_processing(&mut self, started: Instant) -> Result<()> {
        let directory = self.state.require_directory()?.to_path_buf();
        workspace::write_meta(&directory, &self.state)?;
        self.state
            .diagnostics
            .save(&directory.join(workspace::DIAGNOSTICS_FILE))?;
        if self.ctx.engine.clear_structure {
            let removed = workspace::remove_pycache(&directory)?;
            tracing::debug!(removed, "__pycache__ cleaned");
        }
        let (prompt_tokens, completion_tokens, total_tokens) = self.ctx.chat.usage();
        tracing::info!(
            directory = %directory.display(),
            version = self.state.artifacts.version(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            files = self.state.artifacts.len(),
            duration_secs = started.elapsed().as_secs_f64(),
            "software ready"
        );
        Ok(())
    }

    /// 完整运行一次
    pub async fn run(&mut self, task: &str) -> Result<PathBuf> {
        let started = Instant::now();
        let directory = self.pre_processing(task).await?;
        self.execute_chain().await?;
        self.post_processing(started)?;
        Ok(directory)
    }
}
