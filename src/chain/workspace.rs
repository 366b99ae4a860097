//! 项目目录的准备与收尾：备份、清理、assets/、配置副本、meta.txt

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::core::{ProjectState, Result};

pub const ASSETS_DIR: &str = "assets";
pub const META_FILE: &str = "meta.txt";
pub const DIAGNOSTICS_FILE: &str = "diagnostics.json";

/// `<warehouse>/<name>_<org>_<timestamp>`
pub fn project_directory(warehouse: &Path, name: &str, org: &str, timestamp: &str) -> PathBuf {
    warehouse.join(format!("{name}_{org}_{timestamp}"))
}

/// 删除 warehouse 根目录下遗留的非 .py / .log 文件（子目录不动）
pub fn sweep_warehouse(warehouse: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !warehouse.is_dir() {
        return Ok(removed);
    }
    for entry in fs::read_dir(warehouse)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let keep = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("py") | Some("log")
        );
        if !keep {
            fs::remove_file(&path)?;
            tracing::info!(path = %path.display(), "stray file removed");
            removed.push(path);
        }
    }
    Ok(removed)
}

fn is_non_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// 递归复制目录
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// 已存在且非空的目录先整体备份到 `<dir>.<timestamp>`；重名时追加随机后缀
pub fn backup_existing(directory: &Path, timestamp: &str) -> Result<Option<PathBuf>> {
    if !is_non_empty_dir(directory) {
        return Ok(None);
    }
    let mut backup = PathBuf::from(format!("{}.{timestamp}", directory.display()));
    if backup.exists() {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        backup = PathBuf::from(format!("{}.{}", backup.display(), &suffix[..8]));
    }
    copy_tree(directory, &backup)?;
    tracing::info!(from = %directory.display(), to = %backup.display(), "existing project backed up");
    Ok(Some(backup))
}

/// 备份、按需清空并创建 assets/
pub fn prepare_directory(directory: &Path, clear_structure: bool, timestamp: &str) -> Result<()> {
    backup_existing(directory, timestamp)?;
    if clear_structure && directory.exists() {
        fs::remove_dir_all(directory)?;
    }
    fs::create_dir_all(directory.join(ASSETS_DIR))?;
    Ok(())
}

/// 复制公司配置文件并写入原始任务描述
pub fn record_inputs(directory: &Path, company_files: &[PathBuf], project_name: &str, task: &str) -> Result<()> {
    for file in company_files {
        if let Some(name) = file.file_name() {
            fs::copy(file, directory.join(name))?;
        }
    }
    fs::write(directory.join(format!("{project_name}.prompt")), task)?;
    Ok(())
}

/// meta.txt：每项为 `Key:\nvalue\n\n`
pub fn render_meta(state: &ProjectState) -> String {
    let settings = &state.settings;
    let config = format!(
        "clear_structure: {}\ngit_management: {}\ngui_design: {}",
        settings.clear_structure, settings.git_management, settings.gui_design
    );
    let roster = state.roster.summary();
    let version = state.artifacts.version().to_string();
    let fields = [
        ("Task", state.env.task_prompt.as_str()),
        ("Config", config.as_str()),
        ("Roster", roster.as_str()),
        ("Modality", state.env.modality.as_str()),
        ("Ideas", state.env.ideas.as_str()),
        ("Language", state.env.language.as_str()),
        ("Code_Version", version.as_str()),
        ("Proposed_images", "0"),
        ("Incorporated_images", "0"),
    ];
    fields
        .iter()
        .map(|(key, value)| format!("{key}:\n{value}\n\n"))
        .collect()
}

pub fn write_meta(directory: &Path, state: &ProjectState) -> Result<()> {
    fs::write(directory.join(META_FILE), render_meta(state))?;
    Ok(())
}

/// 删除所有 `__pycache__` 目录
pub fn remove_pycache(directory: &Path) -> Result<usize> {
    let caches: Vec<PathBuf> = WalkDir::new(directory)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name() == "__pycache__")
        .map(|e| e.into_path())
        .collect();
    for cache in &caches {
        fs::remove_dir_all(cache)?;
        tracing::debug!(path = %cache.display(), "removed");
    }
    Ok(caches.len())
}
