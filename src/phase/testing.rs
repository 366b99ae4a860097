//! 测试类 Phase：运行测试并总结错误、按错误类别修复、为单个文件编写测试

use async_trait::async_trait;

use crate::artifacts::RenderView;
use crate::core::{EngineContext, EngineError, EnvKey, ProjectState, Result};
use crate::phase::{PhaseEnv, PhaseLogic};
use crate::testing::localize::{asset_paths, is_local_module, missing_module, module_structure};
use crate::testing::{install_once, relevant_files, run_tests, ErrorCategory};

/// 安装了缺失的外部模块后，本轮错误总结的固定结论
pub const NOTHING_TO_DO: &str = "nothing need to do";

const CODE_FENCE: &str = "```";

/// 运行一轮测试；有错误时由开发者总结，外部模块缺失则先尝试安装
#[derive(Debug, Default)]
pub struct TestErrorSummary;

#[async_trait]
impl PhaseLogic for TestErrorSummary {
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
        &[
            EnvKey::ExistBugs,
            EnvKey::TestReports,
            EnvKey::ErrorSummary,
            EnvKey::TestingCommands,
        ]
    }

    async fn prepare(
        &self,
        ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
    ) -> Result<Option<String>> {
        let report = run_tests(ctx, state).await?;
        state.env.exist_bugs = report.has_bugs;
        state.env.test_reports = report.report.clone();
        env.exist_bugs = Some(report.has_bugs);
        env.set(EnvKey::TestReports.placeholder(), report.report.clone());

        if !report.has_bugs {
            tracing::info!("tests passed");
            state.env.error_category = None;
            return Ok(Some(report.report));
        }

        let category = ErrorCategory::detect(&report.report);
        tracing::info!(category = ?category, "test failure classified");
        state.env.error_category = Some(category.clone());

        if let ErrorCategory::ModuleNotFound { module } = &category {
            if !is_local_module(module, &state.artifacts) && install_once(ctx, state, module).await {
                return Ok(Some(NOTHING_TO_DO.to_string()));
            }
        }
        Ok(None)
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        _env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        state.env.error_summary = conclusion.to_string();
        Ok(())
    }
}

/// 只把与错误相关的文件交给开发者修改
#[derive(Debug, Default)]
pub struct TestModification;

fn local_modules(state: &ProjectState) -> String {
    state
        .artifacts
        .source_files()
        .filter_map(|name| name.strip_suffix(".py"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl PhaseLogic for TestModification {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::Ideas,
            EnvKey::TestReports,
            EnvKey::ErrorSummary,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::Codes]
    }

    fn keep_marker(&self) -> bool {
        true
    }

    async fn prepare(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
    ) -> Result<Option<String>> {
        let report = state.env.test_reports.clone();
        let category = state
            .env
            .error_category
            .clone()
            .unwrap_or_else(|| ErrorCategory::detect(&report));
        let files = relevant_files(
            &report,
            &category,
            &state.artifacts,
            &state.dependency_graph,
            &mut state.diagnostics,
        );
        tracing::info!(files = ?files, "relevant files selected for repair");

        env.set(
            EnvKey::Codes.placeholder(),
            state
                .artifacts
                .render_files(files.iter().map(String::as_str), RenderView::default()),
        );
        env.prompt_variant = category.prompt_variant();
        env.set(
            "paths",
            state.directory().map(asset_paths).unwrap_or_default(),
        );
        env.set("module_structure", module_structure(&state.artifacts));
        env.set("missing_module", missing_module(&report).unwrap_or_default());
        env.set("modules", local_modules(state));
        Ok(None)
    }

    async fn apply(
        &self,
        _ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()> {
        if !conclusion.contains(CODE_FENCE) {
            tracing::info!("test modification proposed no code");
            env.changed_files = Some(Vec::new());
            return Ok(());
        }
        let report = state.artifacts.apply_update(conclusion, false, None);
        if report.accepted {
            state.flush_artifacts().await?;
        }
        env.changed_files = Some(report.changed);
        Ok(())
    }
}

/// 扇出子任务：为 `current_file_name` 编写测试，只在工作副本上更新，不落盘
#[derive(Debug, Default)]
pub struct TestWriting;

impl TestWriting {
    pub const CURRENT_FILE: &'static str = "current_file_name";
    pub const CODE_DEPENDENCIES: &'static str = "code_dependencies";
    pub const UNTESTED_CODE: &'static str = "untested_code";

    fn current_file(env: &PhaseEnv) -> Result<String> {
        env.get(Self::CURRENT_FILE)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .ok_or_else(|| EngineError::Config("TestWriting requires current_file_name".to_string()))
    }
}

#[async_trait]
impl PhaseLogic for TestWriting {
    fn reads(&self) -> &'static [EnvKey] {
        &[
            EnvKey::TaskPrompt,
            EnvKey::Modality,
            EnvKey::Language,
            EnvKey::Ideas,
        ]
    }

    fn writes(&self) -> &'static [EnvKey] {
        &[EnvKey::Codes]
    }

    async fn prepare(
        &self,
        _ctx: &EngineContext,
        _state: &mut ProjectState,
        env: &mut PhaseEnv,
    ) -> Result<Option<String>> {
        let file = Self::current_file(env)?;
        tracing::debug!(file = %file, "writing tests");
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
        let file = Self::current_file(env)?;
        let report = state.artifacts.apply_update(conclusion, true, Some(&file));
        if !report.accepted || report.extracted.is_empty() {
            return Err(EngineError::NoValidCodes(format!("TestWriting({file})")));
        }
        state.record_tests(&file, report.extracted.clone());
        tracing::info!(file = %file, tests = ?report.extracted, "tests written");
        env.changed_files = Some(report.changed);
        Ok(())
    }
}
