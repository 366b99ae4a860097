//! 文档产物：requirements.txt、manual.md

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::Result;

fn fenced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").expect("valid regex"))
}

/// 单个文档文件
#[derive(Debug, Clone)]
pub struct DocumentStore {
    filename: String,
    content: String,
}

impl DocumentStore {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: String::new(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// extract_fenced 为 true 时只取第一个代码块；没有代码块则不更新
    pub fn update(&mut self, generated: &str, extract_fenced: bool) -> bool {
        let next = if extract_fenced {
            match fenced_re().captures(generated) {
                Some(caps) => caps[1].trim_end().to_string(),
                None => return false,
            }
        } else {
            generated.trim().to_string()
        };
        if next.is_empty() || next == self.content {
            return false;
        }
        self.content = next;
        true
    }

    pub fn write(&self, directory: &Path) -> Result<()> {
        if self.content.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(directory)?;
        std::fs::write(directory.join(&self.filename), &self.content)?;
        tracing::info!(file = %self.filename, "document written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_from_fenced_block() {
        let mut doc = DocumentStore::new("requirements.txt");
        assert!(doc.update("Here you go:\n```\npygame==2.5.0\nnumpy\n```\n", true));
        assert_eq!(doc.content(), "pygame==2.5.0\nnumpy");
        assert!(!doc.update("no block here", true));
    }

    #[test]
    fn test_manual_keeps_whole_text() {
        let mut doc = DocumentStore::new("manual.md");
        assert!(doc.update("  # Manual\nRun main.py  ", false));
        assert_eq!(doc.content(), "# Manual\nRun main.py");
    }

    #[test]
    fn test_write_skips_empty() {
        let dir = tempfile::tempdir().unwrap();
        let doc = DocumentStore::new("manual.md");
        doc.write(dir.path()).unwrap();
        assert!(!dir.path().join("manual.md").exists());
    }
}
