//! 外部进程执行
//!
//! 通过 `sh -c` 运行被测程序，宽限期到后若仍在运行则按进程组 SIGTERM，
//! 仍不退出再 SIGKILL。宽限期后仍在运行被视为成功（调用方按启发式处理）。

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::core::{EngineError, Result};

/// 进程执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// 被信号终止或宽限期后被杀时为 None
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub still_running: bool,
}

impl ProcessOutcome {
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            still_running: false,
        }
    }

    pub fn running() -> Self {
        Self {
            still_running: true,
            ..Default::default()
        }
    }
}

/// 外部进程执行能力
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str, cwd: &Path, grace: Duration) -> Result<ProcessOutcome>;
}

/// 基于 tokio::process 的实现
#[derive(Debug, Default)]
pub struct TokioProcessRunner;

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

const TERM_WAIT: Duration = Duration::from_secs(1);

#[cfg(unix)]
async fn terminate(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let pgid = Pid::from_raw(pid as i32);
    let _ = killpg(pgid, Signal::SIGTERM);
    if tokio::time::timeout(TERM_WAIT, child.wait()).await.is_err() {
        let _ = killpg(pgid, Signal::SIGKILL);
        let _ = child.kill().await;
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) {
    let _ = child.kill().await;
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &str, cwd: &Path, grace: Duration) -> Result<ProcessOutcome> {
        tracing::info!(command = %command, cwd = %cwd.display(), "run program");

        let mut std_cmd = if cfg!(target_os = "windows") {
            let mut c = std::process::Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = std::process::Command::new("sh");
            c.args(["-c", command]);
            c
        };
        // 独立进程组，宽限期后整组终止
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Process(format!("failed to spawn `{command}`: {e}")))?;
        let stdout_task = tokio::spawn(read_all(child.stdout.take()));
        let stderr_task = tokio::spawn(read_all(child.stderr.take()));

        let (exit_code, still_running) = match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => return Err(EngineError::Process(format!("wait failed: {e}"))),
            Err(_) => {
                terminate(&mut child).await;
                (None, true)
            }
        };

        let stdout = tokio::time::timeout(TERM_WAIT, stdout_task)
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or_default();
        let stderr = tokio::time::timeout(TERM_WAIT, stderr_task)
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or_default();

        tracing::info!(command = %command, ?exit_code, still_running, "program finished");
        Ok(ProcessOutcome {
            exit_code,
            stdout,
            stderr,
            still_running,
        })
    }
}

/// 脚本化执行器：命令中包含某个子串即返回对应结果，否则返回 exit 0
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    outcomes: Vec<(String, ProcessOutcome)>,
    sequences: Mutex<HashMap<String, Vec<ProcessOutcome>>>,
    history: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, needle: &str, outcome: ProcessOutcome) -> Self {
        self.outcomes.push((needle.to_string(), outcome));
        self
    }

    /// 同一命令依次返回不同结果（耗尽后落回 `on` 规则）
    pub fn on_sequence(self, needle: &str, outcomes: Vec<ProcessOutcome>) -> Self {
        if let Ok(mut seq) = self.sequences.lock() {
            seq.insert(needle.to_string(), outcomes.into_iter().rev().collect());
        }
        self
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, command: &str, _cwd: &Path, _grace: Duration) -> Result<ProcessOutcome> {
        if let Ok(mut history) = self.history.lock() {
            history.push(command.to_string());
        }
        if let Ok(mut seq) = self.sequences.lock() {
            for (needle, outcomes) in seq.iter_mut() {
                if command.contains(needle.as_str()) {
                    if let Some(outcome) = outcomes.pop() {
                        return Ok(outcome);
                    }
                }
            }
        }
        Ok(self
            .outcomes
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_else(|| ProcessOutcome::exited(0, "", "")))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_exit_code_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = TokioProcessRunner
            .run("echo out; echo err 1>&2; exit 3", dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
        assert!(!outcome.still_running);
    }

    #[tokio::test]
    async fn test_long_running_program_is_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let outcome = TokioProcessRunner
            .run("sleep 30", dir.path(), Duration::from_millis(200))
            .await
            .unwrap();
        assert!(outcome.still_running);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_scripted_runner_sequence() {
        let runner = ScriptedRunner::new().on_sequence(
            "main.py",
            vec![ProcessOutcome::exited(1, "", "boom"), ProcessOutcome::exited(0, "", "")],
        );
        let dir = Path::new(".");
        let first = runner.run("python3 main.py", dir, Duration::ZERO).await.unwrap();
        let second = runner.run("python3 main.py", dir, Duration::ZERO).await.unwrap();
        assert_eq!(first.exit_code, Some(1));
        assert_eq!(second.exit_code, Some(0));
        assert_eq!(runner.history().len(), 2);
    }
}
