//! 文档类 Phase：依赖清单与使用手册

use async_trait::async_trait;

use crate::core::{EngineContext, EnvKey, ProjectState, Result};
use crate::phase::{PhaseEnv, PhaseLogic};

#[derive(Debug, Default)]
pub struct EnvironmentDoc;

#[async_trait]
impl PhaseLogic for EnvironmentDoc {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::Ideas,
            EnvKey::Codes,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::Requirements]
    }

    fn reflection_question(&self) -> &'static str {
        "According to the codes and file format listed above, write a requirements.txt file to specify the dependencies or packages required for the project to run properly."
    }

    fn keep_marker(&self) -> bool {
        true
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        _env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        if !state.requirements.update(conclusion, true) {
            tracing::warn!("no requirements block in conclusion");
            return Ok(());
        }
        if let Some(directory) = state.directory() {
            state.requirements.write(directory)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Manual;

#[async_trait]
impl PhaseLogic for Manual {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::Ideas,
            EnvKey::Codes,
            EnvKey::Requirements,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::Manual]
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        _env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        if state.manuals.update(conclusion, false) {
            if let Some(directory) = state.directory() {
                state.manuals.write(directory)?;
            }
        }
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

    fn context() -> EngineContext {
        EngineContext::new(
            Arc::new(ScriptedChat::new()),
            Arc::new(ScriptedRunner::new()),
            Arc::new(RecordingInstaller::default()),
        )
    }

    #[tokio::test]
    async fn test_requirements_written_to_project() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = ProjectState::new(ProjectSettings::default(), StoreThresholds::default());
        state.set_directory(dir.path()).unwrap();
        EnvironmentDoc
            .apply(
                &context(),
                &mut state,
                &mut PhaseEnv::default(),
                "requirements.txt\n```\npygame==2.5.0\n```\n<INFO> done",
            )
            .await
            .unwrap();
        let written = std::fs::read_to_string(dir.path().join("requirements.txt")).unwrap();
        assert_eq!(written, "pygame==2.5.0");
    }

    #[tokio::test]
    async fn test_manual_without_directory_stays_in_memory() {
        let mut state = ProjectState::new(ProjectSettings::default(), StoreThresholds::default());
        Manual
            .apply(&context(), &mut state, &mut PhaseEnv::default(), "# Snake\nRun main.py")
            .await
            .unwrap();
        assert_eq!(state.manuals.content(), "# Snake\nRun main.py");
    }
}
