//! 事务化状态：快照、尝试、提交或回滚
//!
//! 对易受模型输出波动影响的 Phase，先在 ProjectState 的深拷贝上执行，
//! 成功才覆盖原状态；失败则丢弃快照，原状态保持不变。

use std::time::Duration;

use crate::core::ProjectState;

/// 重试策略：最大尝试次数与两次尝试之间的退避
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// 只尝试一次，不退避
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}

/// 一次事务：持有目标状态的可变借用与工作副本
pub struct Transaction<'a> {
    target: &'a mut ProjectState,
    working: ProjectState,
}

impl<'a> Transaction<'a> {
    pub fn begin(target: &'a mut ProjectState) -> Self {
        let working = target.clone();
        Self { target, working }
    }

    pub fn working(&mut self) -> &mut ProjectState {
        &mut self.working
    }

    pub fn commit(self) {
        *self.target = self.working;
    }

    pub fn rollback(self) {
        tracing::debug!(revision = self.target.revision(), "transaction rolled back");
    }
}
