//! 运行结果分类与报告抽取
//!
//! - 非零退出 + traceback：截取第一个 traceback 块
//! - 非零退出 + 测试框架 FAILED / failures 标记：截取前 K 个失败块
//! - 宽限期后仍在运行：视为成功（已知有风险的启发式，挂起与长时间运行无法区分）

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::testing::runner::ProcessOutcome;

pub const SUCCESS_REPORT: &str = "The software run successfully without errors.";
pub const MISSING_ENTRY_POINT_REPORT: &str = "[Error] the software lacks an entry point to start";

const TRACEBACK_HEADER: &str = "Traceback (most recent call last)";

fn pytest_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^_{3,} .+ _{3,}$").expect("valid regex"))
}

/// 单条命令的判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(String),
}

/// 去掉报告里的项目目录前缀，只留相对文件名
pub fn strip_directory(text: &str, directory: &Path) -> String {
    let prefix = format!("{}/", directory.display());
    text.replace(&prefix, "")
}

/// 第一个 traceback 块（多个拼接时只留第一个）
pub fn first_traceback(text: &str) -> String {
    let Some(start) = text.find(TRACEBACK_HEADER) else {
        return text.trim().to_string();
    };
    let rest = &text[start..];
    let end = rest[TRACEBACK_HEADER.len()..]
        .find(TRACEBACK_HEADER)
        .map(|i| i + TRACEBACK_HEADER.len())
        .unwrap_or(rest.len());
    rest[..end].trim().to_string()
}

fn is_block_start(line: &str) -> bool {
    line.starts_with("FAIL:") || line.starts_with("ERROR:") || pytest_header_re().is_match(line)
}

/// 测试框架输出中的前 K 个失败块，附带 `FAILED ...` 摘要行
pub fn top_failures(stdout: &str, k: usize) -> String {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in stdout.lines() {
        if is_block_start(line) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(vec![line]);
        } else if line.starts_with("=====") {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
        } else if line.starts_with("-----") {
            // unittest 在块头后紧跟一条分隔线，第二条才是块尾
            match current.take() {
                Some(mut block) if block.len() == 1 => {
                    block.push(line);
                    current = Some(block);
                }
                Some(block) => blocks.push(block),
                None => {}
            }
        } else if let Some(block) = current.as_mut() {
            block.push(line);
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }

    let summary: Vec<&str> = stdout
        .lines()
        .filter(|l| l.starts_with("FAILED "))
        .collect();

    if blocks.is_empty() {
        return stdout.trim().to_string();
    }
    let mut out: Vec<String> = blocks
        .iter()
        .take(k.max(1))
        .map(|b| b.join("\n").trim_end().to_string())
        .collect();
    if !summary.is_empty() {
        out.push(summary.join("\n"));
    }
    out.join("\n\n")
}

/// 分类一次执行结果
pub fn classify(outcome: &ProcessOutcome, directory: &Path, failure_blocks: usize) -> Verdict {
    if outcome.still_running {
        tracing::warn!("program still running after grace period, treated as success");
        return Verdict::Pass;
    }
    if outcome.exit_code == Some(0) {
        return Verdict::Pass;
    }

    let stderr = strip_directory(&outcome.stderr, directory);
    let stdout = strip_directory(&outcome.stdout, directory);
    if stderr.to_lowercase().contains("traceback") {
        return Verdict::Fail(first_traceback(&stderr));
    }
    if stdout.contains("FAILED") || stdout.contains("failures") {
        return Verdict::Fail(top_failures(&stdout, failure_blocks));
    }
    if stdout.contains(TRACEBACK_HEADER) {
        return Verdict::Fail(first_traceback(&stdout));
    }
    if !stderr.trim().is_empty() {
        return Verdict::Fail(stderr.trim().to_string());
    }
    Verdict::Fail(format!(
        "The program exited with code {}",
        outcome
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TB: &str = "Traceback (most recent call last):\n  File \"/tmp/p/main.py\", line 3, in <module>\n    h.run()\nAttributeError: 'Helper' object has no attribute 'run'\n";

    #[test]
    fn test_still_running_is_pass() {
        assert_eq!(classify(&ProcessOutcome::running(), Path::new("/tmp/p"), 3), Verdict::Pass);
    }

    #[test]
    fn test_traceback_failure_strips_directory() {
        let outcome = ProcessOutcome::exited(1, "", TB);
        match classify(&outcome, Path::new("/tmp/p"), 3) {
            Verdict::Fail(report) => {
                assert!(report.contains("File \"main.py\", line 3"));
                assert!(report.contains("AttributeError"));
            }
            Verdict::Pass => panic!("Expected failure"),
        }
    }

    #[test]
    fn test_only_first_traceback_kept() {
        let doubled = format!("{TB}\n{}", TB.replace("AttributeError", "KeyError"));
        let report = first_traceback(&doubled);
        assert!(report.contains("AttributeError"));
        assert!(!report.contains("KeyError"));
    }

    #[test]
    fn test_pytest_failures_top_k() {
        let stdout = "============================= test session starts ==============================\ncollected 3 items\n\ntest_a.py FFF\n\n=================================== FAILURES ===================================\n___________________________________ test_one ___________________________________\n    assert 1 == 2\nE   assert 1 == 2\n___________________________________ test_two ___________________________________\nE   assert 3 == 4\n__________________________________ test_three __________________________________\nE   assert 5 == 6\n=========================== short test summary info ============================\nFAILED test_a.py::test_one - assert 1 == 2\n";
        let outcome = ProcessOutcome::exited(1, stdout, "");
        match classify(&outcome, Path::new("/tmp/p"), 2) {
            Verdict::Fail(report) => {
                assert!(report.contains("test_one"));
                assert!(report.contains("test_two"));
                assert!(!report.contains("test_three"));
                assert!(report.contains("FAILED test_a.py::test_one"));
            }
            Verdict::Pass => panic!("Expected failure"),
        }
    }

    #[test]
    fn test_unittest_failures() {
        let stdout = "F.\n======================================================================\nFAIL: test_add (test_calc.TestCalc)\n----------------------------------------------------------------------\nAssertionError: 3 != 4\n\n----------------------------------------------------------------------\nRan 2 tests in 0.001s\n\nFAILED (failures=1)\n";
        let report = top_failures(stdout, 3);
        assert!(report.contains("FAIL: test_add"));
        assert!(report.contains("AssertionError: 3 != 4"));
    }

    #[test]
    fn test_nonzero_without_output() {
        let outcome = ProcessOutcome {
            exit_code: Some(2),
            ..Default::default()
        };
        assert_eq!(
            classify(&outcome, Path::new("/tmp/p"), 3),
            Verdict::Fail("The program exited with code 2".to_string())
        );
    }
}
