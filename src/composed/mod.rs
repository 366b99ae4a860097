//! 组合 Phase：按配置顺序循环执行子 Phase，直到达到循环上限或退出条件成立
//!
//! 每个子 Phase 执行前后都检查退出条件。不同变体只在退出条件与执行策略上不同：
//! - 顺序执行：易受模型输出波动影响的子 Phase 走事务化重试
//! - 格式重试（CodeAndFormat）：单个子 Phase 反复执行直到输出格式正确
//! - 队列驱动（BugFixing）：忽略循环上限，直到测试队列耗尽或测试通过
//! - 扇出（WritingFullTestSuite）：按文件并发执行，全部完成后串行合并

pub mod fan_out;

use futures_util::future::{BoxFuture, FutureExt};

use crate::config::ChainItem;
use crate::core::{
    EngineContext, EngineError, ProjectState, RecoveryAction, RecoveryEngine, Result, Transaction,
};
use crate::phase::{Phase, PhaseBook, PhaseEnv};

/// 在事务副本上执行并按恢复策略重试的子 Phase
pub const TRANSACTIONAL_PHASES: [&str; 4] = [
    "ProductBacklogModification",
    "SprintBacklogModification",
    "SprintReview",
    "NextSprintBacklogCreating",
];

const FINISHED: &str = "Finished.";

/// 已知的组合 Phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposedKind {
    ProductBacklogUpdate,
    SprintBacklogUpdate,
    SprintCompletion,
    CodeCompleteAll,
    CodeReview,
    Test,
    CodeAndFormat,
    BugFixing,
    WritingFullTestSuite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Sequential,
    FormatRetry,
    UntilQueueEmpty,
    FanOut,
}

impl ComposedKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "ProductBacklogUpdate" => Self::ProductBacklogUpdate,
            "SprintBacklogUpdate" => Self::SprintBacklogUpdate,
            "SprintCompletion" => Self::SprintCompletion,
            "CodeCompleteAll" => Self::CodeCompleteAll,
            "CodeReview" => Self::CodeReview,
            "Test" => Self::Test,
            "CodeAndFormat" => Self::CodeAndFormat,
            "BugFixing" => Self::BugFixing,
            "WritingFullTestSuite" => Self::WritingFullTestSuite,
            _ => return None,
        })
    }

    fn strategy(self) -> Strategy {
        match self {
            Self::CodeAndFormat => Strategy::FormatRetry,
            Self::BugFixing => Strategy::UntilQueueEmpty,
            Self::WritingFullTestSuite => Strategy::FanOut,
            _ => Strategy::Sequential,
        }
    }

    /// 退出条件：只看组合 Phase 的局部环境
    pub fn should_break(self, env: &PhaseEnv) -> bool {
        match self {
            Self::ProductBacklogUpdate => env.get("product_backlog_comments") == Some(FINISHED),
            Self::SprintBacklogUpdate => env.get("sprint_backlog_comments") == Some(FINISHED),
            Self::CodeCompleteAll => env.unimplemented_file.as_deref() == Some(""),
            Self::CodeReview => {
                env.has_no_comment
                    || env
                        .changed_files
                        .as_ref()
                        .map(|files| files.is_empty())
                        .unwrap_or(false)
            }
            Self::Test => env.exist_bugs == Some(false),
            Self::CodeAndFormat => env.has_correct_format == Some(true),
            Self::SprintCompletion | Self::BugFixing | Self::WritingFullTestSuite => false,
        }
    }
}

/// max_turn_step <= 0 时使用默认轮数
pub fn resolve_turns(max_turn_step: i64, default_turn_limit: usize) -> usize {
    if max_turn_step <= 0 {
        default_turn_limit
    } else {
        max_turn_step as usize
    }
}

/// 非致命错误记录后继续；致命错误向上抛出
fn tolerate(phase: &str, result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(phase, error = %e, "phase failed, continuing with current state");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

/// 在事务副本上执行；失败时按恢复引擎的建议回滚重试、放弃或终止
pub async fn run_transactional(
    phase: &Phase,
    ctx: &EngineContext,
    state: &mut ProjectState,
    env: &mut PhaseEnv,
    turns: usize,
    need_reflect: bool,
) -> Result<()> {
    let policy = ctx.engine.retry_policy();
    let recovery = RecoveryEngine::new();
    for attempt in 1..=policy.max_attempts {
        let mut tx = Transaction::begin(state);
        let mut attempt_env = env.clone();
        let outcome = phase
            .execute(ctx, tx.working(), &mut attempt_env, turns, need_reflect)
            .await;
        let err = match outcome {
            Ok(_) => {
                tx.commit();
                *env = attempt_env;
                return Ok(());
            }
            Err(e) => {
                tx.rollback();
                e
            }
        };
        match recovery.handle(&err, attempt, policy.max_attempts) {
            RecoveryAction::Abort => return Err(err),
            RecoveryAction::RetryFromSnapshot => {
                tracing::warn!(phase = %phase.name(), attempt, error = %err, "retrying from snapshot");
                tokio::time::sleep(policy.backoff).await;
            }
            RecoveryAction::Continue => {
                tracing::warn!(
                    phase = %phase.name(),
                    attempt,
                    error = %err,
                    "retries exhausted, keeping original state"
                );
                return Ok(());
            }
        }
    }
    Ok(())
}

/// 执行一个单 Phase 链路项
pub async fn run_simple(
    ctx: &EngineContext,
    book: &PhaseBook,
    state: &mut ProjectState,
    env: &mut PhaseEnv,
    name: &str,
    max_turn_step: i64,
    need_reflect: bool,
) -> Result<()> {
    let phase = book.get(name)?;
    let turns = resolve_turns(max_turn_step, ctx.engine.default_turn_limit);
    if TRANSACTIONAL_PHASES.contains(&name) {
        return run_transactional(phase, ctx, state, env, turns, need_reflect).await;
    }
    let result = phase
        .execute(ctx, state, env, turns, need_reflect)
        .await
        .map(|_| ());
    tolerate(name, result)
}

/// 执行任意链路项（单 Phase 或组合 Phase）
pub async fn run_item(
    item: &ChainItem,
    ctx: &EngineContext,
    book: &PhaseBook,
    state: &mut ProjectState,
    env: &mut PhaseEnv,
) -> Result<()> {
    match item {
        ChainItem::SimplePhase {
            phase,
            max_turn_step,
            need_reflect,
        } => run_simple(ctx, book, state, env, phase, *max_turn_step, *need_reflect).await,
        ChainItem::ComposedPhase { .. } => {
            let composed = ComposedPhase::from_item(item)?;
            composed.execute(ctx, book, state).await
        }
    }
}

/// 一个组合 Phase 实例
#[derive(Debug, Clone)]
pub struct ComposedPhase {
    name: String,
    kind: ComposedKind,
    cycle_bound: usize,
    items: Vec<ChainItem>,
}

impl ComposedPhase {
    pub fn new(kind: ComposedKind, name: impl Into<String>, cycle_bound: usize, items: Vec<ChainItem>) -> Self {
        Self {
            name: name.into(),
            kind,
            cycle_bound,
            items,
        }
    }

    pub fn from_item(item: &ChainItem) -> Result<Self> {
        match item {
            ChainItem::ComposedPhase {
                phase,
                cycle_num,
                composition,
            } => {
                let kind = ComposedKind::from_name(phase)
                    .ok_or_else(|| EngineError::UnknownComposedPhase(phase.clone()))?;
                Ok(Self::new(kind, phase.clone(), *cycle_num, composition.clone()))
            }
            ChainItem::SimplePhase { phase, .. } => Err(EngineError::UnknownComposedPhase(phase.clone())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComposedKind {
        self.kind
    }

    /// 执行整个组合 Phase（可嵌套，因此返回装箱的 future）
    pub fn execute<'a>(
        &'a self,
        ctx: &'a EngineContext,
        book: &'a PhaseBook,
        state: &'a mut ProjectState,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            tracing::info!(
                composed = %self.name,
                cycle_bound = self.cycle_bound,
                strategy = ?self.kind.strategy(),
                "composed phase started"
            );
            match self.kind.strategy() {
                Strategy::Sequential => self.run_sequential(ctx, book, state).await,
                Strategy::FormatRetry => self.run_format_retry(ctx, book, state).await,
                Strategy::UntilQueueEmpty => self.run_until_queue_empty(ctx, book, state).await,
                Strategy::FanOut => fan_out::run(self, ctx, book, state).await,
            }
        }
        .boxed()
    }

    pub(crate) fn items(&self) -> &[ChainItem] {
        &self.items
    }

    async fn run_sequential(
        &self,
        ctx: &EngineContext,
        book: &PhaseBook,
        state: &mut ProjectState,
    ) -> Result<()> {
        let mut env = PhaseEnv::default();
        for cycle in 0..self.cycle_bound {
            tracing::debug!(composed = %self.name, cycle, "cycle started");
            for item in &self.items {
                if self.kind.should_break(&env) {
                    tracing::info!(composed = %self.name, cycle, "break condition met");
                    return Ok(());
                }
                run_item(item, ctx, book, state, &mut env).await?;
                if self.kind.should_break(&env) {
                    tracing::info!(composed = %self.name, cycle, "break condition met");
                    return Ok(());
                }
                if state.env.end_sprint {
                    tracing::info!(composed = %self.name, "end of sprints signalled");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// 每个子 Phase 在全新副本上反复执行，直到格式正确或达到重试上限
    async fn run_format_retry(
        &self,
        ctx: &EngineContext,
        book: &PhaseBook,
        state: &mut ProjectState,
    ) -> Result<()> {
        let mut env = PhaseEnv::default();
        let retries = ctx.engine.format_retries.max(1);
        for cycle in 0..self.cycle_bound {
            for item in &self.items {
                if self.kind.should_break(&env) {
                    return Ok(());
                }
                let ChainItem::SimplePhase {
                    phase: name,
                    max_turn_step,
                    need_reflect,
                } = item
                else {
                    run_item(item, ctx, book, state, &mut env).await?;
                    continue;
                };
                let phase = book.get(name)?;
                let turns = resolve_turns(*max_turn_step, ctx.engine.default_turn_limit);
                let mut attempt = 0;
                while !self.kind.should_break(&env) && attempt < retries {
                    attempt += 1;
                    tracing::info!(phase = %name, cycle, attempt, "format attempt");
                    let mut tx = Transaction::begin(state);
                    match phase.execute(ctx, tx.working(), &mut env, turns, *need_reflect).await {
                        Ok(_) => tx.commit(),
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            tracing::warn!(phase = %name, attempt, error = %e, "format attempt failed");
                            tx.rollback();
                        }
                    }
                }
                if self.kind.should_break(&env) {
                    return Ok(());
                }
                if state.env.end_sprint {
                    return Ok(());
                }
            }
        }
        tracing::warn!(composed = %self.name, "output still not well-formed");
        Ok(())
    }

    /// 循环直到测试队列耗尽；测试通过时提前结束
    async fn run_until_queue_empty(
        &self,
        ctx: &EngineContext,
        book: &PhaseBook,
        state: &mut ProjectState,
    ) -> Result<()> {
        let mut env = PhaseEnv::default();
        state.env.testing_commands = None;
        let mut round = 0usize;
        while !matches!(&state.env.testing_commands, Some(queue) if queue.is_empty()) {
            round += 1;
            tracing::info!(composed = %self.name, round, "bug fixing round");
            for item in &self.items {
                run_item(item, ctx, book, state, &mut env).await?;
                if env.exist_bugs == Some(false) {
                    break;
                }
                if state.env.end_sprint {
                    state.env.testing_commands = None;
                    return Ok(());
                }
            }
            if env.exist_bugs == Some(false) {
                break;
            }
            if state.env.testing_commands.is_none() {
                tracing::warn!(composed = %self.name, "no test run in this round, stopping");
                break;
            }
        }
        tracing::info!(composed = %self.name, rounds = round, "bug fixing finished");
        state.env.testing_commands = None;
        Ok(())
    }
}
