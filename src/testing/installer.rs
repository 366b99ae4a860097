//! 外部模块安装（尽力而为）

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;

/// 缺失模块安装能力；返回是否成功
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, module: &str) -> bool;
}

/// 通过 shell 命令安装，`{module}` 替换为模块名
#[derive(Debug, Clone)]
pub struct ShellInstaller {
    template: String,
}

impl ShellInstaller {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl PackageInstaller for ShellInstaller {
    async fn install(&self, module: &str) -> bool {
        let command = self.template.replace("{module}", module);
        tracing::info!(command = %command, "install missing module");
        match Command::new("sh").args(["-c", &command]).output().await {
            Ok(output) => {
                if !output.status.success() {
                    tracing::warn!(
                        module,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "install failed"
                    );
                }
                output.status.success()
            }
            Err(e) => {
                tracing::warn!(module, error = %e, "failed to run installer");
                false
            }
        }
    }
}

/// 只记录调用的安装器（测试 / 离线演练）
#[derive(Debug, Default)]
pub struct RecordingInstaller {
    installed: Mutex<Vec<String>>,
}

impl RecordingInstaller {
    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PackageInstaller for RecordingInstaller {
    async fn install(&self, module: &str) -> bool {
        if let Ok(mut installed) = self.installed.lock() {
            installed.push(module.to_string());
        }
        true
    }
}
