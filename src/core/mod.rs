//! 核心：错误、恢复、项目状态、事务与扇出调度

pub mod context;
pub mod error;
pub mod recovery;
pub mod roster;
pub mod state;
pub mod task_scheduler;
pub mod transaction;

pub use context::EngineContext;
pub use error::{EngineError, RecoveryAction, Result};
pub use recovery::RecoveryEngine;
pub use roster::Roster;
pub use state::{Blackboard, EnvKey, ProjectSettings, ProjectState};
pub use task_scheduler::{TaskOutcome, TaskScheduler};
pub use transaction::{RetryPolicy, Transaction};
