//! 错误恢复引擎
//!
//! 将 EngineError 映射为 RecoveryAction，供事务化重试决定是回滚重试、跳过还是终止。

use crate::core::{EngineError, RecoveryAction};

/// 语义化错误恢复：配置错误终止，模型输出 / 外部调用错误回滚重试
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// attempt 从 1 开始；超过 max_attempts 后不再建议重试
    pub fn handle(&self, err: &EngineError, attempt: u32, max_attempts: u32) -> RecoveryAction {
        if err.is_fatal() {
            return RecoveryAction::Abort;
        }
        match err {
            EngineError::NoValidCodes(_)
            | EngineError::MalformedConclusion { .. }
            | EngineError::Chat(_)
            | EngineError::Json(_)
            | EngineError::Process(_)
            | EngineError::Io(_) => {
                if attempt < max_attempts {
                    RecoveryAction::RetryFromSnapshot
                } else {
                    RecoveryAction::Continue
                }
            }
            _ => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_fatal_config_error() {
        let engine = RecoveryEngine::new();
        let err = EngineError::UnknownPhase("Nope".to_string());
        assert_eq!(engine.handle(&err, 1, 3), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_role_not_recruited() {
        let engine = RecoveryEngine::new();
        let err = EngineError::RoleNotRecruited("Tester".to_string());
        assert_eq!(engine.handle(&err, 1, 3), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_malformed_output_retries() {
        let engine = RecoveryEngine::new();
        let err = EngineError::MalformedConclusion {
            phase: "SprintReview".to_string(),
            reason: "empty".to_string(),
        };
        assert_eq!(engine.handle(&err, 1, 3), RecoveryAction::RetryFromSnapshot);
        assert_eq!(engine.handle(&err, 2, 3), RecoveryAction::RetryFromSnapshot);
    }

    #[test]
    fn test_recovery_exhausted_continues() {
        let engine = RecoveryEngine::new();
        let err = EngineError::Chat("rate limited".to_string());
        assert_eq!(engine.handle(&err, 3, 3), RecoveryAction::Continue);
    }
}
