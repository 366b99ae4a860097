//! 落盘与版本管理
//!
//! 把仓库中的每个文件写到项目目录（HTML 放 templates/，Flask 应用会创建该目录），
//! 目录在写入前已有代码文件时版本号加一（assets/、配置副本不算）；
//! 开启 git 管理时缺少 .git 先初始化，每次落盘提交一次。

use std::path::{Path, PathBuf};

use tokio::process::Command;
use walkdir::WalkDir;

use crate::artifacts::extract::normalize_body;
use crate::artifacts::ArtifactStore;
use crate::core::{EngineError, Result};

/// 一次落盘的结果
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub version: u32,
    pub written: Vec<PathBuf>,
}

async fn git(directory: &Path, args: &[&str]) {
    match Command::new("git")
        .args(args)
        .current_dir(directory)
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            tracing::debug!(args = ?args, "git ok");
        }
        Ok(output) => {
            tracing::warn!(
                args = ?args,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git command failed"
            );
        }
        Err(e) => tracing::warn!(args = ?args, error = %e, "failed to run git"),
    }
}

impl ArtifactStore {
    /// 目标路径：HTML 文件进入 templates/
    fn target_path(directory: &Path, filename: &str) -> PathBuf {
        if filename.ends_with(".html") && !filename.starts_with("templates/") {
            directory.join("templates").join(filename)
        } else {
            directory.join(filename)
        }
    }

    /// 写出全部文件；只能在协调方调用（扇出任务内部不落盘）
    pub async fn flush_to_disk(&mut self, directory: &Path, git_management: bool) -> Result<FlushReport> {
        let rewriting = self
            .files()
            .keys()
            .any(|name| Self::target_path(directory, name).is_file());
        if rewriting {
            self.version += 1;
        }
        std::fs::create_dir_all(directory)?;

        let needs_templates = self
            .files()
            .iter()
            .any(|(name, code)| name.ends_with(".html") || code.contains("Flask("));
        if needs_templates {
            std::fs::create_dir_all(directory.join("templates"))?;
        }

        let mut written = Vec::new();
        for (name, code) in self.files() {
            let path = Self::target_path(directory, name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, code)?;
            written.push(path);
        }
        tracing::info!(
            directory = %directory.display(),
            files = written.len(),
            version = self.version,
            "codes rewritten"
        );

        if git_management {
            if !directory.join(".git").exists() {
                git(directory, &["init"]).await;
            }
            git(directory, &["add", "."]).await;
            let message = self.version.to_string();
            git(directory, &["commit", "-m", &message]).await;
        }

        Ok(FlushReport {
            version: self.version,
            written,
        })
    }

    /// 从已有目录装载 .py 文件（空行已去除）
    pub fn load_from_disk(&mut self, directory: &Path) -> Result<usize> {
        let mut loaded = 0;
        for entry in WalkDir::new(directory)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("py") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let code = std::fs::read_to_string(path)?;
            self.load(name.to_string(), normalize_body(&code));
            loaded += 1;
        }
        if loaded == 0 {
            return Err(EngineError::Config(format!(
                "no python files found under {}",
                directory.display()
            )));
        }
        tracing::info!(count = loaded, directory = %directory.display(), "files read from disk");
        Ok(loaded)
    }
}
