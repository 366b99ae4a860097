//! 引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：配置类错误直接终止；其余错误由事务化重试决定是否回滚后再试。

use thiserror::Error;

/// 引擎运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum EngineError {
    /// 角色未在 roster 中招募（配置错误，不重试）
    #[error("Role not recruited: {0}")]
    RoleNotRecruited(String),

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Unknown composed phase: {0}")]
    UnknownComposedPhase(String),

    #[error("Phase config missing for: {0}")]
    MissingPhaseConfig(String),

    #[error("Turn limit must be within 1..=100, got {0}")]
    InvalidTurnLimit(usize),

    #[error("Project directory already set to {0}")]
    DirectoryAlreadySet(String),

    /// 抽取级联没有得到任何文件
    #[error("No valid codes in conclusion of {0}")]
    NoValidCodes(String),

    #[error("Malformed conclusion in {phase}: {reason}")]
    MalformedConclusion { phase: String, reason: String },

    #[error("Chat backend error: {0}")]
    Chat(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// 静态配置损坏导致的错误：立即抛出，不参与重试
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::RoleNotRecruited(_)
                | EngineError::UnknownPhase(_)
                | EngineError::UnknownComposedPhase(_)
                | EngineError::MissingPhaseConfig(_)
                | EngineError::InvalidTurnLimit(_)
                | EngineError::DirectoryAlreadySet(_)
                | EngineError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 丢弃快照，基于原状态再试一次
    RetryFromSnapshot,
    /// 放弃本次尝试但继续执行后续 Phase
    Continue,
    /// 终止整个链路
    Abort,
}
