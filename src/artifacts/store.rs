//! 产物仓库（codebook）：文件名 -> 源码
//!
//! - 更新幂等：内容相同不记 diff、不计入 changed files
//! - 完整性阈值：抽取内容占原始输出比例不足时整体拒绝，仓库保持不变
//! - 近重复折叠：未见过的文件名按相似度 / 规范化名字解析到已有文件

use std::collections::{BTreeMap, BTreeSet};

use similar::TextDiff;

use crate::artifacts::extract::{self, ExtractContext};
use crate::artifacts::similarity::similarity;
use crate::artifacts::syntax::is_python_file;

/// 阈值（经验值，来自配置）
#[derive(Debug, Clone, Copy)]
pub struct StoreThresholds {
    /// 近重复判定
    pub duplicate: f64,
    /// 抽取内容 / 原始输出 的最小比例
    pub completeness: f64,
    /// 未知文件名解析到已有文件
    pub rename: f64,
}

impl Default for StoreThresholds {
    fn default() -> Self {
        Self {
            duplicate: 0.6,
            completeness: 0.5,
            rename: 0.6,
        }
    }
}

/// 一次文件改动的审计记录
#[derive(Debug, Clone)]
pub struct DiffRecord {
    pub filename: String,
    pub version: u32,
    pub unified_diff: String,
}

/// `render` 的视图选项
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderView {
    pub ignore_tests: bool,
    pub only_tests: bool,
    /// 只保留函数签名与文档字符串
    pub simplify: bool,
}

/// `apply_update` 的结果
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    /// 是否格式正确（抽取成功且通过完整性阈值）
    pub accepted: bool,
    pub strategy: Option<&'static str>,
    pub ratio: f64,
    /// 本次内容实际发生变化的文件
    pub changed: Vec<String>,
    /// 本次抽取到的全部文件（含未变化的）
    pub extracted: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    files: BTreeMap<String, String>,
    test_files: BTreeSet<String>,
    changed_files: BTreeSet<String>,
    sprint_changed_files: BTreeSet<String>,
    diff_log: Vec<DiffRecord>,
    pub(crate) version: u32,
    thresholds: StoreThresholds,
}

/// 文件名规范化：小写并去掉下划线 / 连字符
fn normalized_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '-'], "")
}

fn stem(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.rsplit_once('.').map(|(s, _)| s).unwrap_or(base)
}

/// 测试文件命名约定：test 开头或以 test 结尾
pub fn is_test_filename(name: &str) -> bool {
    let stem = stem(name);
    stem.starts_with("test") || stem.ends_with("test")
}

/// 候选文件名是否属于目标文件：同名，或 `test_<stem>` / `<stem>_test`
pub fn matches_target(candidate: &str, target: &str) -> bool {
    if candidate == target {
        return true;
    }
    let (candidate, target) = (stem(candidate), stem(target));
    candidate.strip_prefix("test_") == Some(target) || candidate.strip_suffix("_test") == Some(target)
}

fn language_tag(filename: &str) -> &str {
    if is_python_file(filename) {
        "python"
    } else {
        filename.rsplit('.').next().unwrap_or(filename)
    }
}

/// 函数体省略：保留 def 行与其文档字符串，跳过其余函数体
pub fn simplify_code(code: &str) -> String {
    let mut out = Vec::new();
    let mut skipping: Option<usize> = None;
    let mut def_indent = 0usize;
    let mut docstring_marks = 0u8;
    let mut in_def = false;

    for line in code.lines() {
        let trimmed = line.trim();
        let indent = line.len() - line.trim_start().len();
        if trimmed.starts_with("def ") || trimmed.starts_with("async def ") {
            in_def = true;
            skipping = None;
            def_indent = indent;
            docstring_marks = 0;
            out.push(line);
            continue;
        }
        if let Some(level) = skipping {
            if !trimmed.is_empty() && indent <= level {
                skipping = None;
                in_def = false;
            } else {
                continue;
            }
        }
        if in_def && (trimmed == "\"\"\"" || trimmed == "'''") {
            docstring_marks += 1;
            out.push(line);
            if docstring_marks == 2 {
                skipping = Some(def_indent);
            }
            continue;
        }
        out.push(line);
    }
    out.join("\n")
}

/// 是否仍有 `pass` 占位行
pub fn has_pass_stub(code: &str) -> bool {
    code.lines().any(|line| line.trim() == "pass")
}

impl ArtifactStore {
    pub fn new(thresholds: StoreThresholds) -> Self {
        Self {
            files: BTreeMap::new(),
            test_files: BTreeSet::new(),
            changed_files: BTreeSet::new(),
            sprint_changed_files: BTreeSet::new(),
            diff_log: Vec::new(),
            version: 1,
            thresholds,
        }
    }

    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn thresholds(&self) -> StoreThresholds {
        self.thresholds
    }

    pub fn is_test(&self, name: &str) -> bool {
        self.test_files.contains(name) || is_test_filename(name)
    }

    pub fn test_files(&self) -> impl Iterator<Item = &str> {
        self.files
            .keys()
            .filter(|name| self.is_test(name))
            .map(String::as_str)
    }

    pub fn source_files(&self) -> impl Iterator<Item = &str> {
        self.files
            .keys()
            .filter(|name| !self.is_test(name))
            .map(String::as_str)
    }

    pub fn changed_files(&self) -> &BTreeSet<String> {
        &self.changed_files
    }

    pub fn sprint_changed_files(&self) -> &BTreeSet<String> {
        &self.sprint_changed_files
    }

    /// 新 sprint 开始时清空 sprint 级 changed files
    pub fn start_sprint(&mut self) {
        self.sprint_changed_files.clear();
    }

    pub fn diff_log(&self) -> &[DiffRecord] {
        &self.diff_log
    }

    /// 未见过的文件名解析到已有文件：规范化名字相同，或内容相似度超过阈值
    fn resolve_name(&self, name: &str, body: &str) -> String {
        if self.files.contains_key(name) {
            return name.to_string();
        }
        let wanted = normalized_name(name);
        if let Some(existing) = self.files.keys().find(|k| normalized_name(k) == wanted) {
            return existing.clone();
        }
        let code_aware = is_python_file(name);
        self.files
            .iter()
            .map(|(k, content)| (k, similarity(content, body, code_aware)))
            .filter(|(_, score)| *score > self.thresholds.rename)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, _)| k.clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// 写入单个文件；内容未变返回 false
    pub fn insert(&mut self, name: &str, body: String, is_test: bool) -> bool {
        if self.files.get(name) == Some(&body) {
            return false;
        }
        let old = self.files.get(name).map(String::as_str).unwrap_or("# None");
        let unified_diff = TextDiff::from_lines(old, body.as_str())
            .unified_diff()
            .header("Old", "New")
            .to_string();
        tracing::info!(file = %name, version = self.version, "codes updated");
        tracing::debug!(file = %name, "\n{}", unified_diff);
        self.diff_log.push(DiffRecord {
            filename: name.to_string(),
            version: self.version,
            unified_diff,
        });
        if is_test {
            self.test_files.insert(name.to_string());
        }
        self.changed_files.insert(name.to_string());
        self.sprint_changed_files.insert(name.to_string());
        self.files.insert(name.to_string(), body);
        true
    }

    /// 解析一次模型输出并合并进仓库
    ///
    /// target 非空时只接受属于该目标文件的候选（扇出写测试时使用）。
    /// 抽取失败或内容比例低于阈值时返回 accepted = false，仓库保持不变。
    pub fn apply_update(&mut self, raw: &str, is_test: bool, target: Option<&str>) -> UpdateReport {
        let ctx = ExtractContext {
            existing: &self.files,
            duplicate_threshold: self.thresholds.duplicate,
        };
        let Some((strategy, candidates)) = extract::extract(raw, &ctx) else {
            tracing::warn!("no files extracted from conclusion");
            return UpdateReport::default();
        };

        let raw_len = raw.trim().chars().count().max(1);
        let new_len: usize = candidates.values().map(|body| body.chars().count()).sum();
        let ratio = new_len as f64 / raw_len as f64;
        if ratio < self.thresholds.completeness {
            tracing::warn!(strategy, ratio, "submission rejected as incorrectly formatted");
            return UpdateReport {
                accepted: false,
                strategy: Some(strategy),
                ratio,
                ..Default::default()
            };
        }

        let mut report = UpdateReport {
            accepted: true,
            strategy: Some(strategy),
            ratio,
            ..Default::default()
        };
        for (name, body) in candidates {
            if let Some(target) = target {
                if !matches_target(&name, target) {
                    tracing::debug!(file = %name, wanted = %target, "skipped by target filter");
                    continue;
                }
            }
            let resolved = self.resolve_name(&name, &body);
            let tag_test = is_test || is_test_filename(&resolved);
            if self.insert(&resolved, body, tag_test) {
                report.changed.push(resolved.clone());
            }
            report.extracted.push(resolved);
        }
        report
    }

    /// 渲染为 `name\n```lang\ncode\n```` 形式
    pub fn render(&self, view: RenderView) -> String {
        self.render_filtered(view, |_| true)
    }

    /// 只渲染指定文件
    pub fn render_files<'a>(&self, names: impl IntoIterator<Item = &'a str>, view: RenderView) -> String {
        let wanted: BTreeSet<&str> = names.into_iter().collect();
        self.render_filtered(view, |name| wanted.contains(name))
    }

    fn render_filtered(&self, view: RenderView, keep: impl Fn(&str) -> bool) -> String {
        let mut content = String::new();
        for (name, code) in &self.files {
            let is_test = self.is_test(name);
            if (view.only_tests && !is_test) || (view.ignore_tests && is_test) || !keep(name) {
                continue;
            }
            let code = if view.simplify {
                simplify_code(code)
            } else {
                code.clone()
            };
            content.push_str(&format!("{}\n```{}\n{}\n```\n\n", name, language_tag(name), code));
        }
        content
    }

    /// 合并扇出任务的结果：只接收与当前内容不同的文件
    pub fn merge_from(&mut self, other: &ArtifactStore) -> Vec<String> {
        let mut merged = Vec::new();
        for (name, body) in &other.files {
            if self.files.get(name) != Some(body) && self.insert(name, body.clone(), other.is_test(name)) {
                merged.push(name.clone());
            }
        }
        merged
    }

    /// 仍含 `pass` 占位的 Python 文件
    pub fn stub_files(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|(name, code)| is_python_file(name) && has_pass_stub(code))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// 直接装载（从磁盘恢复时使用），不记 diff
    pub(crate) fn load(&mut self, name: String, body: String) {
        self.files.insert(name, body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ArtifactStore {
        ArtifactStore::new(StoreThresholds::default())
    }

    const HELPER: &str = "FILENAME: helper.py\n```python\nclass Helper:\n    def __init__(self):\n        self.count = 0\n    def run(self):\n        self.count += 1\n        return self.count\n```\n";

    #[test]
    fn test_update_is_idempotent() {
        let mut s = store();
        let first = s.apply_update(HELPER, false, None);
        assert!(first.accepted);
        assert_eq!(first.changed, vec!["helper.py".to_string()]);
        assert_eq!(s.diff_log().len(), 1);

        s.start_sprint();
        let second = s.apply_update(HELPER, false, None);
        assert!(second.accepted);
        assert!(second.changed.is_empty());
        assert_eq!(s.diff_log().len(), 1);
        assert!(s.sprint_changed_files().is_empty());
        assert_eq!(s.changed_files().len(), 1);
    }

    #[test]
    fn test_low_content_ratio_is_rejected() {
        let mut s = store();
        let prose = "We discussed the design at length. ".repeat(40);
        let raw = format!("{prose}\nFILENAME: a.py\n```python\nx = 1\n```\n");
        let report = s.apply_update(&raw, false, None);
        assert!(!report.accepted);
        assert!(report.ratio < 0.5);
        assert!(s.is_empty());
        assert!(s.diff_log().is_empty());
    }

    #[test]
    fn test_sufficient_content_ratio_is_accepted() {
        let mut s = store();
        let report = s.apply_update(HELPER, false, None);
        assert!(report.accepted);
        assert!(report.ratio >= 0.5);
        assert!(s.get("helper.py").is_some());
    }

    #[test]
    fn test_similar_unnamed_block_overwrites_existing() {
        let mut s = store();
        s.apply_update(HELPER, false, None);
        let unnamed = "FILENAME\n```python\nclass Helper:\n    def __init__(self):\n        self.count = 0\n    def run(self):\n        self.count += 2\n        return self.count\n```\n";
        let report = s.apply_update(unnamed, false, None);
        assert!(report.accepted);
        assert_eq!(s.len(), 1);
        assert!(s.get("helper.py").unwrap().contains("+= 2"));
    }

    #[test]
    fn test_dissimilar_unnamed_block_creates_new_file() {
        let mut s = store();
        s.apply_update(HELPER, false, None);
        let unnamed = "FILENAME\n```python\nclass Scoreboard:\n    def render(self, screen, font):\n        screen.blit(font.render('score', True, (0, 0, 0)), (10, 10))\n```\n";
        s.apply_update(unnamed, false, None);
        assert_eq!(s.len(), 2);
        assert!(s.get("scoreboard.py").is_some());
    }

    #[test]
    fn test_normalized_name_resolves_to_existing() {
        let mut s = store();
        s.apply_update(HELPER, false, None);
        let renamed = HELPER.replace("helper.py", "Helper.py").replace("+= 1", "+= 3");
        s.apply_update(&renamed, false, None);
        assert_eq!(s.len(), 1);
        assert!(s.get("helper.py").unwrap().contains("+= 3"));
    }

    #[test]
    fn test_target_filter_skips_other_files() {
        let mut s = store();
        let raw = "FILENAME: test_helper.py\n```python\nimport helper\ndef test_run():\n    assert helper.Helper().run() == 1\n```\nFILENAME: test_main.py\n```python\nimport main\ndef test_main():\n    assert main\n```\n";
        let report = s.apply_update(raw, true, Some("helper.py"));
        assert!(report.accepted);
        assert_eq!(report.changed, vec!["test_helper.py".to_string()]);
        assert!(s.is_test("test_helper.py"));
        assert!(s.get("test_main.py").is_none());
    }

    #[test]
    fn test_render_views() {
        let mut s = store();
        s.insert("main.py", "print(1)".to_string(), false);
        s.insert("test_main.py", "def test_x():\n    pass".to_string(), true);
        let all = s.render(RenderView::default());
        assert!(all.contains("main.py\n```python\nprint(1)\n```"));
        let only = s.render(RenderView {
            only_tests: true,
            ..Default::default()
        });
        assert!(only.contains("test_main.py") && !only.contains("print(1)"));
        let ignore = s.render(RenderView {
            ignore_tests: true,
            ..Default::default()
        });
        assert!(!ignore.contains("test_main.py"));
    }

    #[test]
    fn test_simplify_drops_function_bodies() {
        let code = "class A:\n    def f(self):\n        \"\"\"\n        Doc.\n        \"\"\"\n        x = 1\n        return x\n    def g(self):\n        return 2\n";
        let simple = simplify_code(code);
        assert!(simple.contains("Doc."));
        assert!(!simple.contains("x = 1"));
        assert!(simple.contains("def g(self):"));
    }

    #[test]
    fn test_stub_files() {
        let mut s = store();
        s.insert("a.py", "def f():\n    pass".to_string(), false);
        s.insert("b.py", "def g():\n    return 1".to_string(), false);
        assert_eq!(s.stub_files(), vec!["a.py".to_string()]);
    }

    #[test]
    fn test_test_filename_convention() {
        assert!(is_test_filename("test_helper.py"));
        assert!(is_test_filename("helper_test.py"));
        assert!(!is_test_filename("helper.py"));
        assert!(matches_target("test_helper.py", "helper.py"));
        assert!(!matches_target("test_main.py", "helper.py"));
        assert!(matches_target("helper_test.py", "helper.py"));
    }

    #[test]
    fn test_target_filter_rejects_overlapping_stems() {
        assert!(!matches_target("test_main.py", "ai.py"));
        assert!(!matches_target("test_domain.py", "main.py"));
        assert!(!matches_target("test_mainloop.py", "main.py"));

        let mut s = store();
        let raw = "FILENAME: test_main.py\n```python\nimport main\n\ndef test_run():\n    assert main is not None\n```\n";
        let report = s.apply_update(raw, true, Some("ai.py"));
        assert!(report.changed.is_empty());
        assert!(s.get("test_main.py").is_none());
    }
}
