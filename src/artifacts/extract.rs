//! 文本抽取级联：从一次模型输出中恢复 文件名 -> 源码 映射
//!
//! 四个策略按固定顺序尝试，第一个产出至少一个文件的策略胜出（不合并）：
//! 1. `FILENAME` 标记行 + 代码块（名字靠近重复检测或类名推导）
//! 2. `FILENAME: name.ext` 行内标记 + 代码块
//! 3. 代码块上一行给出文件名：`<name>\n```lang\n...```
//! 4. 结构化多文件文档（`FILENAME:` / `DOCSTRING` / `CODE` / `LANGUAGE` 标记，逐行扫描）
//!
//! 每个策略都是纯函数 `(text, ctx) -> Option<Candidates>`，只读已有文件用于相似度折叠。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::artifacts::similarity::similarity;
use crate::artifacts::syntax::{class_names, is_python_file, is_valid_python};

/// 候选文件集合（文件名 -> 已规范化的内容）
pub type Candidates = BTreeMap<String, String>;

/// 单个抽取策略
pub type Strategy = fn(&str, &ExtractContext<'_>) -> Option<Candidates>;

/// 级联顺序（名字用于日志）
pub const CASCADE: [(&str, Strategy); 4] = [
    ("filename_marker", filename_marker),
    ("inline_filename", inline_filename),
    ("named_fence", named_fence),
    ("structured_document", structured_document),
];

/// 策略可见的只读上下文
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    pub existing: &'a BTreeMap<String, String>,
    pub duplicate_threshold: f64,
}

const PLACEHOLDER_LINES: &[&str] = &["CODE", "DOCSTRING", "'''", "\"\"\""];

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)FILENAME\n```[^\n]*\n(.*?)```").expect("valid regex"))
}

fn inline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)FILENAME: ([a-z_0-9]+\.\w+)\n```[^\n]*\n(.*?)```").expect("valid regex")
    })
}

fn named_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)(.+?\.\w+)\n```\w+\n(.*?)```").expect("valid regex"))
}

fn filename_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+\.\w+").expect("valid regex"))
}

/// 去掉所有空白行
pub fn normalize_body(body: &str) -> String {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 主体仍是模板占位文本（如仅有 "CODE"）
pub fn is_placeholder(body: &str) -> bool {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .all(|line| PLACEHOLDER_LINES.contains(&line))
}

fn accepts(filename: &str, body: &str) -> bool {
    !is_python_file(filename) || is_valid_python(body)
}

/// 由代码内容推导文件名：首个类名小写 + .py；无类但有 `__main__` 入口时为 main.py
pub fn filename_from_code(body: &str) -> Option<String> {
    if let Some(class) = class_names(body).first() {
        return Some(format!("{}.py", class.to_lowercase()));
    }
    if body.contains("__main__") {
        return Some("main.py".to_string());
    }
    None
}

/// 行内最后一个形如 `name.ext` 的记号
pub fn filename_from_line(line: &str) -> Option<String> {
    filename_token_re()
        .find_iter(line)
        .last()
        .map(|m| m.as_str().to_string())
}

/// 相似度最高且超过阈值的已有文件（包括本次已抽取的候选）
pub fn best_match(
    body: &str,
    existing: &BTreeMap<String, String>,
    extra: &Candidates,
    threshold: f64,
) -> Option<(String, f64)> {
    existing
        .iter()
        .chain(extra.iter())
        .map(|(name, content)| (name, similarity(content, body, is_python_file(name))))
        .filter(|(_, score)| *score > threshold)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(name, score)| (name.clone(), score))
}

fn non_empty(files: Candidates) -> Option<Candidates> {
    if files.is_empty() {
        None
    } else {
        Some(files)
    }
}

/// 策略 1：`FILENAME` 标记行紧接代码块
pub fn filename_marker(text: &str, ctx: &ExtractContext<'_>) -> Option<Candidates> {
    let mut files = Candidates::new();
    for caps in marker_re().captures_iter(text) {
        let raw = &caps[1];
        if is_placeholder(raw) {
            continue;
        }
        let body = normalize_body(raw);
        let name = match best_match(&body, ctx.existing, &files, ctx.duplicate_threshold) {
            Some((name, _)) => name,
            None => match filename_from_code(&body) {
                Some(name) => name,
                None => continue,
            },
        };
        files.insert(name, body);
    }
    non_empty(files)
}

/// 策略 2：`FILENAME: name.ext`，Python 源码须语法有效
pub fn inline_filename(text: &str, _ctx: &ExtractContext<'_>) -> Option<Candidates> {
    let mut files = Candidates::new();
    for caps in inline_re().captures_iter(text) {
        let (name, raw) = (&caps[1], &caps[2]);
        if is_placeholder(raw) {
            continue;
        }
        let body = normalize_body(raw);
        if accepts(name, &body) {
            files.insert(name.to_string(), body);
        }
    }
    non_empty(files)
}

/// 策略 3：代码块上一行给出文件名；名字无法解析时按相似度折叠到已有文件
pub fn named_fence(text: &str, ctx: &ExtractContext<'_>) -> Option<Candidates> {
    let mut files = Candidates::new();
    for caps in named_fence_re().captures_iter(text) {
        let raw = &caps[2];
        if is_placeholder(raw) {
            continue;
        }
        let body = normalize_body(raw);
        let named = filename_from_line(&caps[1])
            .filter(|name| !name.starts_with('.'))
            .or_else(|| filename_from_code(&body));
        let name = match named {
            Some(name) => name,
            None => match best_match(&body, ctx.existing, &files, ctx.duplicate_threshold) {
                Some((name, _)) => name,
                None => continue,
            },
        };
        if accepts(&name, &body) {
            files.insert(name, body);
        }
    }
    non_empty(files)
}

fn commit_file(name: Option<String>, lines: &mut Vec<&str>, files: &mut Candidates) {
    if let Some(name) = name {
        let body = normalize_body(&lines.join("\n"));
        if !body.is_empty() && !is_placeholder(&body) && accepts(&name, &body) {
            files.insert(name, body);
        }
    }
    lines.clear();
}

/// 策略 4：逐行扫描的结构化文档
pub fn structured_document(text: &str, _ctx: &ExtractContext<'_>) -> Option<Candidates> {
    let mut files = Candidates::new();
    let mut current: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();
    let mut capturing = false;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("FILENAME:") {
            if !capturing {
                commit_file(current.take(), &mut buffer, &mut files);
            }
            current = rest.split_whitespace().next().map(str::to_string);
            capturing = false;
            buffer.clear();
        } else if line.starts_with("```") {
            if capturing {
                commit_file(current.take(), &mut buffer, &mut files);
            }
            capturing = !capturing && current.is_some();
        } else if line.starts_with("DOCSTRING")
            || line.starts_with("CODE")
            || line.starts_with("LANGUAGE")
        {
            continue;
        } else if capturing {
            buffer.push(line);
        }
    }
    // 末尾未闭合的代码块视为截断，丢弃
    non_empty(files)
}

/// 依次尝试级联，返回胜出策略名与候选文件
pub fn extract(text: &str, ctx: &ExtractContext<'_>) -> Option<(&'static str, Candidates)> {
    CASCADE
        .iter()
        .find_map(|(name, strategy)| strategy(text, ctx).map(|files| (*name, files)))
}
