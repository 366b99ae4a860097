//! 测试 / 调试循环：执行被测程序、分类失败、定位相关文件

pub mod installer;
pub mod localize;
pub mod report;
pub mod runner;
pub mod session;

pub use installer::{PackageInstaller, RecordingInstaller, ShellInstaller};
pub use localize::{relevant_files, ErrorCategory};
pub use report::{classify, Verdict, MISSING_ENTRY_POINT_REPORT, SUCCESS_REPORT};
pub use runner::{ProcessOutcome, ProcessRunner, ScriptedRunner, TokioProcessRunner};
pub use session::{install_once, plan_targets, run_tests, TestReport, TestTarget};
