//! 测试 / 调试循环的一轮执行
//!
//! 本轮要执行的目标：上一轮失败后剩余的队列（接着跑），否则重新推导：
//! 1. 依赖图拓扑序展开的测试文件，以及尚未关联到源文件的测试文件
//! 2. 配置中额外的命令
//! 3. 没有被依赖、且带入口语句的源文件；一个都没有时放入 "缺少入口" 标记
//!
//! 遇到第一个失败即返回，剩余目标写回黑板，下一轮从这里继续。

use std::collections::VecDeque;
use std::fmt;

use crate::artifacts::syntax::has_entry_point;
use crate::config::TestingSection;
use crate::core::{EngineContext, ProjectState, Result};
use crate::observability::Heuristic;
use crate::testing::report::{classify, Verdict, MISSING_ENTRY_POINT_REPORT, SUCCESS_REPORT};

/// 一条待执行的测试目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestTarget {
    /// 测试文件，用 suite_command 执行
    Suite(String),
    /// 程序入口文件，用 program_command 执行
    Program(String),
    /// 配置里给出的原样命令
    Command(String),
    MissingEntryPoint,
}

impl fmt::Display for TestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestTarget::Suite(file) => write!(f, "test {file}"),
            TestTarget::Program(file) => write!(f, "run {file}"),
            TestTarget::Command(command) => f.write_str(command),
            TestTarget::MissingEntryPoint => f.write_str("<missing entry point>"),
        }
    }
}

impl TestTarget {
    /// 交给 shell 执行的命令行；缺少入口时没有命令
    pub fn command_line(&self, testing: &TestingSection) -> Option<String> {
        match self {
            TestTarget::Suite(file) => Some(testing.suite_command.replace("{file}", file)),
            TestTarget::Program(file) => Some(testing.program_command.replace("{file}", file)),
            TestTarget::Command(command) => Some(command.clone()),
            TestTarget::MissingEntryPoint => None,
        }
    }
}

/// 一轮测试的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub has_bugs: bool,
    pub report: String,
    pub failed: Option<TestTarget>,
}

impl TestReport {
    fn clean() -> Self {
        Self {
            has_bugs: false,
            report: SUCCESS_REPORT.to_string(),
            failed: None,
        }
    }
}

/// 重新推导本轮的测试队列
pub fn plan_targets(state: &ProjectState, testing: &TestingSection) -> VecDeque<TestTarget> {
    let graph = &state.dependency_graph;
    let store = &state.artifacts;
    let mut queue = VecDeque::new();

    let ordered = graph.test_order(&state.test_file_map);
    for test in &ordered {
        if store.get(test).is_some() {
            queue.push_back(TestTarget::Suite(test.clone()));
        }
    }
    for test in store.test_files() {
        if !ordered.iter().any(|t| t == test) {
            queue.push_back(TestTarget::Suite(test.to_string()));
        }
    }

    queue.extend(testing.extra_commands.iter().cloned().map(TestTarget::Command));

    let runnable = |name: &str| store.get(name).map(has_entry_point).unwrap_or(false);
    let mut programs: Vec<String> = graph
        .sources_without_dependents()
        .into_iter()
        .filter(|name| runnable(name))
        .collect();
    if programs.is_empty() {
        programs = store
            .source_files()
            .filter(|name| runnable(name))
            .map(str::to_string)
            .collect();
    }
    if programs.is_empty() {
        queue.push_back(TestTarget::MissingEntryPoint);
    } else {
        queue.extend(programs.into_iter().map(TestTarget::Program));
    }
    queue
}

/// 执行一轮测试；失败不是引擎错误，只体现在报告里
pub async fn run_tests(ctx: &EngineContext, state: &mut ProjectState) -> Result<TestReport> {
    let directory = state.require_directory()?.to_path_buf();
    let mut queue = match state.env.testing_commands.take() {
        Some(pending) if !pending.is_empty() => {
            tracing::info!(remaining = pending.len(), "resuming test queue");
            pending
        }
        _ => {
            let planned = plan_targets(state, &ctx.testing);
            tracing::info!(planned = planned.len(), "test queue derived");
            planned
        }
    };

    while let Some(current) = queue.pop_front() {
        tracing::info!(command = %current, "running test target");
        let verdict = match current.command_line(&ctx.testing) {
            None => Verdict::Fail(MISSING_ENTRY_POINT_REPORT.to_string()),
            Some(line) => {
                if matches!(current, TestTarget::Suite(_)) {
                    state.diagnostics.hit(Heuristic::TestCase);
                }
                match ctx.runner.run(&line, &directory, ctx.testing.grace_period()).await {
                    Ok(outcome) => classify(&outcome, &directory, ctx.testing.failure_blocks),
                    Err(e) => Verdict::Fail(format!("An error occurred: {e}")),
                }
            }
        };

        if let Verdict::Fail(report) = verdict {
            tracing::warn!(command = %current, remaining = queue.len(), "test target failed");
            if current == TestTarget::MissingEntryPoint {
                queue.clear();
            }
            state.env.testing_commands = Some(queue);
            return Ok(TestReport {
                has_bugs: true,
                report,
                failed: Some(current),
            });
        }
    }

    state.env.testing_commands = Some(VecDeque::new());
    Ok(TestReport::clean())
}

/// 外部缺失模块只尝试安装一次；返回本次是否真的发起了安装
pub async fn install_once(ctx: &EngineContext, state: &mut ProjectState, module: &str) -> bool {
    if !state.attempted_installs.insert(module.to_string()) {
        tracing::info!(module, "install already attempted, escalating to developer");
        return false;
    }
    let ok = ctx.installer.install(module).await;
    tracing::info!(module, success = ok, "install attempted");
    true
}
