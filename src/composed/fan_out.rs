//! 扇出写测试：每个待测文件在独立的状态副本上执行，全部完成后由协调方串行合并并统一落盘

use crate::artifacts::{is_test_filename, RenderView};
use crate::composed::{resolve_turns, ComposedPhase};
use crate::config::ChainItem;
use crate::core::{EngineContext, ProjectState, Result, TaskScheduler};
use crate::phase::testing::TestWriting;
use crate::phase::{PhaseBook, PhaseEnv};

/// 本轮需要补写测试的文件：sprint 内改动过的文件及其（传递）引用方，不含测试文件
///
/// 用 sprint 改动集而不是整次运行的改动集：之前 sprint 改过的文件已在当时写过测试。
pub fn targets(state: &ProjectState) -> Vec<String> {
    let changed = state.artifacts.sprint_changed_files();
    state
        .dependency_graph
        .ancestors(changed.iter().map(String::as_str))
        .into_iter()
        .filter(|name| !is_test_filename(name) && !state.artifacts.is_test(name))
        .filter(|name| state.artifacts.get(name).is_some())
        .collect()
}

fn worker_env(state: &ProjectState, file: &str) -> PhaseEnv {
    let mut env = PhaseEnv::default();
    let simplified = RenderView {
        simplify: true,
        ..Default::default()
    };
    let dependencies = state.dependency_graph.imports_of(file);
    env.set(TestWriting::CURRENT_FILE, file);
    env.set(
        TestWriting::UNTESTED_CODE,
        state.artifacts.render_files([file], RenderView::default()),
    );
    env.set(
        TestWriting::CODE_DEPENDENCIES,
        state
            .artifacts
            .render_files(dependencies.iter().map(String::as_str), simplified),
    );
    env
}

pub(crate) async fn run(
    composed: &ComposedPhase,
    ctx: &EngineContext,
    book: &PhaseBook,
    state: &mut ProjectState,
) -> Result<()> {
    let files = targets(state);
    if files.is_empty() {
        tracing::info!(composed = %composed.name(), "no changed files to test");
        return Ok(());
    }

    let mut steps = Vec::new();
    for item in composed.items() {
        match item {
            ChainItem::SimplePhase {
                phase,
                max_turn_step,
                need_reflect,
            } => {
                let turns = resolve_turns(*max_turn_step, ctx.engine.default_turn_limit);
                steps.push((book.get(phase)?.clone(), turns, *need_reflect));
            }
            ChainItem::ComposedPhase { phase, .. } => {
                tracing::warn!(composed = %composed.name(), nested = %phase, "nested phase skipped in fan-out");
            }
        }
    }

    let jobs: Vec<_> = files
        .iter()
        .map(|file| {
            let ctx = ctx.clone();
            let steps = steps.clone();
            let mut worker = state.clone();
            let mut env = worker_env(state, file);
            let file = file.clone();
            async move {
                for (phase, turns, need_reflect) in &steps {
                    if let Err(e) = phase.execute(&ctx, &mut worker, &mut env, *turns, *need_reflect).await {
                        tracing::warn!(file = %file, phase = %phase.name(), error = %e, "test writing failed");
                        return (file, None);
                    }
                }
                (file, Some(worker))
            }
        })
        .collect();

    let scheduler = TaskScheduler::for_jobs(jobs.len(), ctx.engine.fan_out_cap);
    tracing::info!(
        composed = %composed.name(),
        files = jobs.len(),
        concurrency = scheduler.max_concurrent(),
        "fan-out dispatched"
    );
    let outcomes = scheduler.run_all(jobs).await;

    let base = state.diagnostics.clone();
    let mut merged_files = 0usize;
    for outcome in outcomes {
        let (file, worker) = match outcome {
            Ok(done) => done,
            Err(panic) => {
                tracing::warn!(error = %panic, "fan-out task panicked");
                continue;
            }
        };
        let Some(worker) = worker else {
            continue;
        };
        let merged = state.artifacts.merge_from(&worker.artifacts);
        merged_files += merged.len();
        if let Some(tests) = worker.test_file_map.get(&file) {
            state.record_tests(&file, tests.iter().cloned());
        }
        state.diagnostics.absorb(&worker.diagnostics, &base);
        tracing::debug!(file = %file, merged = ?merged, "worker merged");
    }

    state.flush_artifacts().await?;
    tracing::info!(composed = %composed.name(), merged = merged_files, "fan-out merged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::StoreThresholds;
    use crate::core::ProjectSettings;

    #[test]
    fn test_targets_include_importers_but_not_tests() {
        let mut state = ProjectState::new(ProjectSettings::default(), StoreThresholds::default());
        state
            .artifacts
            .insert("board.py", "class Board:\n    pass\n".to_string(), false);
        state.artifacts.insert(
            "main.py",
            "from board import Board\nif __name__ == '__main__':\n    Board()\n".to_string(),
            false,
        );
        state.artifacts.insert(
            "test_board.py",
            "from board import Board\n".to_string(),
            true,
        );
        state.artifacts.insert("util.py", "X = 1\n".to_string(), false);
        state.artifacts.start_sprint();
        state
            .artifacts
            .insert("board.py", "class Board:\n    size = 3\n".to_string(), false);
        state.rebuild_graph();
        assert_eq!(targets(&state), vec!["board.py".to_string(), "main.py".to_string()]);
    }
}
