//! 编码类 Phase：编写、格式修正、补全未实现文件、代码评审

use async_trait::async_trait;

use crate::artifacts::store::has_pass_stub;
use crate::artifacts::syntax::is_python_file;
use crate::core::{EngineContext, EngineError, EnvKey, ProjectState, Result};
use crate::phase::{PhaseEnv, PhaseLogic};
use crate::testing::localize::asset_paths;

const GUI_HINT: &str = "The software should be equipped with graphical user interface (GUI) so that user can visually and graphically use it; so you must choose a GUI framework (e.g., in Python, you can implement GUI via tkinter, Pygame, Flexx, PyGUI, etc,).";

const REVIEW_FINISHED: &str = "Finished";
const CODE_FENCE: &str = "```";

/// 把结论写入仓库；成功时落盘并重建依赖图
async fn apply_codes(state: &mut ProjectState, conclusion: &str) -> Result<bool> {
    let report = state.artifacts.apply_update(conclusion, false, None);
    if !report.accepted {
        return Ok(false);
    }
    tracing::info!(
        strategy = report.strategy.unwrap_or("none"),
        changed = report.changed.len(),
        "codes updated"
    );
    state.flush_artifacts().await?;
    Ok(true)
}

fn asset_listing(state: &ProjectState) -> String {
    state.directory().map(asset_paths).unwrap_or_default()
}

const CODING_READS: &[EnvKey] = &[
    EnvKey::TaskPrompt,
    EnvKey::Modality,
    EnvKey::Language,
    EnvKey::Ideas,
    EnvKey::ProgrammingTask,
    EnvKey::AssignedTasks,
];

/// 首个 Sprint 从零编写；后续 Sprint 在已有代码上继续
#[derive(Debug, Default)]
pub struct Coding {
    pub inherit: bool,
}

impl Coding {
    pub fn fresh() -> Self {
        Self { inherit: false }
    }

    pub fn inherited() -> Self {
        Self { inherit: true }
    }
}

#[async_trait]
impl PhaseLogic for Coding {
    fn reads(&self) -> &'static [EnvKey] {
        if self.inherit {
            &[
                EnvKey::TaskPrompt,
                EnvKey::Modality,
                EnvKey::Language,
                EnvKey::Ideas,
                EnvKey::ProgrammingTask,
                EnvKey::AssignedTasks,
                EnvKey::Codes,
            ]
        } else {
            CODING_READS
        }
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::Codes, EnvKey::RawCodeConclusion]
    }

    async fn prepare(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
    ) -> Result<Option<String>> {
        let gui = if state.settings.gui_design { GUI_HINT } else { "" };
        env.set("gui", gui);
        Ok(None)
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        let accepted = apply_codes(state, conclusion).await?;
        env.has_correct_format = Some(accepted);
        if !accepted {
            tracing::warn!("coding conclusion kept for formatting");
            state.env.raw_code_conclusion = conclusion.to_string();
        }
        Ok(())
    }
}

/// 把格式不正确的编码结论重新整理成可抽取的形式
#[derive(Debug, Default)]
pub struct CodeFormatting;

#[async_trait]
impl PhaseLogic for CodeFormatting {
    fn reads(&self) -> &'static [EnvKey] {
        &[EnvKey::Language, EnvKey::RawCodeConclusion]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::Codes]
    }

    async fn prepare(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
    ) -> Result<Option<String>> {
        env.set("code", state.env.raw_code_conclusion.clone());
        Ok(None)
    }

    fn keep_marker(&self) -> bool {
        true
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        if !apply_codes(state, conclusion).await? {
            env.has_correct_format = Some(false);
            return Err(EngineError::NoValidCodes("CodeFormatting".to_string()));
        }
        env.has_correct_format = Some(true);
        state.env.raw_code_conclusion.clear();
        Ok(())
    }
}

/// 挑选仍含 `pass` 占位、尝试次数未超限的源文件逐个补全
#[derive(Debug, Default)]
pub struct CodeComplete;

impl CodeComplete {
    fn next_target(state: &ProjectState, env: &PhaseEnv, attempts: u32) -> Option<String> {
        let store = &state.artifacts;
        store
            .source_files()
            .filter(|name| is_python_file(name))
            .filter(|name| store.get(name).map(has_pass_stub).unwrap_or(false))
            .find(|name| env.num_tried.get(*name).copied().unwrap_or(0) < attempts)
            .map(str::to_string)
    }
}

#[async_trait]
impl PhaseLogic for CodeComplete {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::Codes,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::Codes]
    }

    async fn prepare(
        &self,
        ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
    ) -> Result<Option<String>> {
        match Self::next_target(state, env, ctx.engine.code_complete_attempts) {
            Some(file) => {
                let tried = env.num_tried.entry(file.clone()).or_insert(0);
                *tried += 1;
                tracing::info!(file = %file, attempt = *tried, "completing unimplemented file");
                env.set("unimplemented_file", file.clone());
                env.unimplemented_file = Some(file);
                Ok(None)
            }
            None => {
                tracing::info!("no unimplemented file left");
                env.unimplemented_file = Some(String::new());
                Ok(Some(String::new()))
            }
        }
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        if env.unimplemented_file.as_deref() == Some("") {
            return Ok(());
        }
        if !apply_codes(state, conclusion).await? {
            return Err(EngineError::NoValidCodes("CodeComplete".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CodeReviewComment;

#[async_trait]
impl PhaseLogic for CodeReviewComment {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::Ideas,
            EnvKey::ProgrammingTask,
            EnvKey::Codes,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::ReviewComments]
    }

    async fn prepare(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
    ) -> Result<Option<String>> {
        env.set("images", asset_listing(state));
        Ok(None)
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        state.env.review_comments = conclusion.to_string();
        env.has_no_comment = conclusion.contains(REVIEW_FINISHED);
        if env.has_no_comment {
            tracing::info!("code review finished without comments");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CodeReviewModification;

#[async_trait]
impl PhaseLogic for CodeReviewModification {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::Ideas,
            EnvKey::Codes,
            EnvKey::ReviewComments,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::Codes]
    }

    fn keep_marker(&self) -> bool {
        true
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        if !conclusion.contains(CODE_FENCE) {
            env.changed_files = Some(Vec::new());
            return Ok(());
        }
        let report = state.artifacts.apply_update(conclusion, false, None);
        if report.accepted {
            state.flush_artifacts().await?;
        }
        tracing::info!(changed = ?report.changed, "review modification applied");
        env.changed_files = Some(report.changed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::artifacts::StoreThresholds;
    use crate::chat::ScriptedChat;
    use crate::core::ProjectSettings;
    use crate::testing::{RecordingInstaller, ScriptedRunner};

    const BOARD: &str = "FILENAME: board.py\n```python\nclass Board:\n    def __init__(self):\n        self.cells = [0] * 9\n    def place(self, index):\n        self.cells[index] = 1\n```\n";

    fn context() -> EngineContext {
        EngineContext::new(
            Arc::new(ScriptedChat::new()),
            Arc::new(ScriptedRunner::new()),
            Arc::new(RecordingInstaller::default()),
        )
    }

    fn state() -> ProjectState {
        ProjectState::new(ProjectSettings::default(), StoreThresholds::default())
    }

    #[tokio::test]
    async fn test_coding_accepts_well_formed_conclusion() {
        let ctx = context();
        let mut state = state();
        let mut env = PhaseEnv::default();
        Coding::fresh().apply(&ctx, &mut state, &mut env, BOARD).await.unwrap();
        assert_eq!(env.has_correct_format, Some(true));
        assert!(state.artifacts.get("board.py").is_some());
        assert!(state.env.raw_code_conclusion.is_empty());
    }

    #[tokio::test]
    async fn test_coding_keeps_raw_conclusion_on_rejection() {
        let ctx = context();
        let mut state = state();
        let mut env = PhaseEnv::default();
        let chatter = "We should discuss the architecture first and then write code.";
        Coding::fresh().apply(&ctx, &mut state, &mut env, chatter).await.unwrap();
        assert_eq!(env.has_correct_format, Some(false));
        assert_eq!(state.env.raw_code_conclusion, chatter);
        assert!(state.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_code_complete_tracks_attempts() {
        let ctx = context();
        let mut state = state();
        state
            .artifacts
            .insert("game.py", "class Game:\n    def run(self):\n        pass\n".to_string(), false);
        let mut env = PhaseEnv::default();
        let limit = ctx.engine.code_complete_attempts;
        for _ in 0..limit {
            let shortcut = CodeComplete.prepare(&ctx, &mut state, &mut env).await.unwrap();
            assert!(shortcut.is_none());
            assert_eq!(env.unimplemented_file.as_deref(), Some("game.py"));
        }
        let shortcut = CodeComplete.prepare(&ctx, &mut state, &mut env).await.unwrap();
        assert_eq!(shortcut.as_deref(), Some(""));
        assert_eq!(env.unimplemented_file.as_deref(), Some(""));
        CodeComplete.apply(&ctx, &mut state, &mut env, "").await.unwrap();
    }

    #[tokio::test]
    async fn test_review_comment_finished() {
        let ctx = context();
        let mut state = state();
        let mut env = PhaseEnv::default();
        CodeReviewComment
            .apply(&ctx, &mut state, &mut env, "<INFO> Finished")
            .await
            .unwrap();
        assert!(env.has_no_comment);
    }

    #[tokio::test]
    async fn test_review_modification_without_fence_changes_nothing() {
        let ctx = context();
        let mut state = state();
        let mut env = PhaseEnv::default();
        CodeReviewModification
            .apply(&ctx, &mut state, &mut env, "Looks good to me.")
            .await
            .unwrap();
        assert_eq!(env.changed_files, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_review_modification_records_changed_files() {
        let ctx = context();
        let mut state = state();
        let mut env = PhaseEnv::default();
        CodeReviewModification
            .apply(&ctx, &mut state, &mut env, BOARD)
            .await
            .unwrap();
        assert_eq!(env.changed_files, Some(vec!["board.py".to_string()]));
    }
}
