//! 引擎上下文：外部协作者（对话、进程、安装器）与运行参数

use std::sync::Arc;

use crate::chat::ChatBackend;
use crate::config::{EngineSection, TestingSection};
use crate::testing::{PackageInstaller, ProcessRunner};

/// 所有 Phase 共享的只读上下文；扇出时克隆到各个任务（协作者本身是 Arc）
#[derive(Clone)]
pub struct EngineContext {
    pub chat: Arc<dyn ChatBackend>,
    pub runner: Arc<dyn ProcessRunner>,
    pub installer: Arc<dyn PackageInstaller>,
    pub engine: EngineSection,
    pub testing: TestingSection,
}

impl EngineContext {
    pub fn new(
        chat: Arc<dyn ChatBackend>,
        runner: Arc<dyn ProcessRunner>,
        installer: Arc<dyn PackageInstaller>,
    ) -> Self {
        Self {
            chat,
            runner,
            installer,
            engine: EngineSection::default(),
            testing: TestingSection::default(),
        }
    }

    pub fn with_engine(mut self, engine: EngineSection) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_testing(mut self, testing: TestingSection) -> Self {
        self.testing = testing;
        self
    }
}
