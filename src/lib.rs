//! Crewforge - Agile 多角色协作软件生成引擎
//!
//! 模块划分：
//! - **artifacts**: 代码抽取级联、代码库（版本、差异、落盘、git）、requirements / manual 文档
//! - **chain**: 链路驱动（前置处理、sprint 循环、后置处理）
//! - **chat**: 两角色对话能力（LLM 角色扮演 / 脚本化）
//! - **composed**: 组合 Phase（循环、格式重试、测试队列、扇出写测试）
//! - **config**: 应用配置（TOML + 环境变量）与公司配置（JSON）
//! - **core**: 项目状态、错误与恢复、事务、任务调度、引擎上下文
//! - **graph**: Python 源码依赖图
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **observability**: tracing 初始化与诊断计数
//! - **phase**: Phase 执行、提示词渲染、具体 Phase 与注册表
//! - **testing**: 测试执行、报告判定、错误定位与缺失模块安装

pub mod artifacts;
pub mod chain;
pub mod chat;
pub mod composed;
pub mod config;
pub mod core;
pub mod graph;
pub mod llm;
pub mod observability;
pub mod phase;
pub mod testing;

pub use crate::chain::ChatChain;
pub use crate::config::{load_config, AppConfig, CompanyConfig};
pub use crate::core::{EngineContext, EngineError, ProjectState};
