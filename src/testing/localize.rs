//! 错误分类与相关文件定位
//!
//! 根据测试报告识别错误类别，再决定把哪些源文件作为下一轮修复的上下文：
//! 类相关错误（AttributeError / TypeError）查找定义该类的文件，
//! 其余情况取报告中出现的文件在依赖图上的邻居。

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::artifacts::syntax::{class_names, defines_class, imported_modules, is_python_file};
use crate::artifacts::ArtifactStore;
use crate::graph::DependencyGraph;
use crate::observability::{Diagnostics, Heuristic};
use crate::testing::report::MISSING_ENTRY_POINT_REPORT;

macro_rules! static_re {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("valid regex"))
        }
    };
}

static_re!(missing_module_re, r"No module named '([^']+)'");
static_re!(object_attribute_re, r"'(\w+)' object has no attribute '(\w+)'");
static_re!(type_attribute_re, r"type object '(\w+)' has no attribute '(\w+)'");
static_re!(module_attribute_re, r"module '([\w.]+)' has no attribute '(\w+)'");
static_re!(init_type_re, r"(\w+)\.__init__\(\)");
static_re!(method_type_re, r"(\w+)\.\w+\(\) (?:missing|takes|got)");
static_re!(undefined_name_re, r"name '(\w+)' is not defined");
static_re!(import_name_re, r"cannot import name '(\w+)' from '([\w.]+)'");
static_re!(frame_re, r#"File "([^"]+)", line \d+"#);
static_re!(pytest_location_re, r"(?m)^([\w./-]+\.py):\d+:");

/// 测试报告的错误类别
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    MissingEntryPoint,
    ModuleNotFound { module: String },
    NameOrImport { symbol: Option<String>, module: Option<String> },
    Attribute { class: Option<String>, attribute: Option<String> },
    TypeMismatch { class: Option<String> },
    FileNotFound,
    Syntax,
    Assertion,
    Other,
}

impl ErrorCategory {
    /// 从报告文本识别类别；ModuleNotFoundError 是 ImportError 的子类，需先判断
    pub fn detect(report: &str) -> Self {
        if report.contains(MISSING_ENTRY_POINT_REPORT) {
            return ErrorCategory::MissingEntryPoint;
        }
        if report.contains("ModuleNotFoundError") {
            if let Some(module) = missing_module(report) {
                return ErrorCategory::ModuleNotFound { module };
            }
        }
        if report.contains("FileNotFoundError") {
            return ErrorCategory::FileNotFound;
        }
        if report.contains("AttributeError") {
            let caps = object_attribute_re()
                .captures(report)
                .or_else(|| type_attribute_re().captures(report));
            if let Some(caps) = caps {
                return ErrorCategory::Attribute {
                    class: Some(caps[1].to_string()),
                    attribute: Some(caps[2].to_string()),
                };
            }
            return ErrorCategory::Attribute {
                class: None,
                attribute: module_attribute_re()
                    .captures(report)
                    .map(|caps| caps[2].to_string()),
            };
        }
        if report.contains("TypeError") {
            let class = init_type_re()
                .captures(report)
                .or_else(|| method_type_re().captures(report))
                .map(|caps| caps[1].to_string());
            return ErrorCategory::TypeMismatch { class };
        }
        if report.contains("NameError") || report.contains("ImportError") {
            if let Some(caps) = import_name_re().captures(report) {
                return ErrorCategory::NameOrImport {
                    symbol: Some(caps[1].to_string()),
                    module: Some(caps[2].to_string()),
                };
            }
            return ErrorCategory::NameOrImport {
                symbol: undefined_name_re()
                    .captures(report)
                    .map(|caps| caps[1].to_string()),
                module: None,
            };
        }
        if report.contains("SyntaxError") || report.contains("IndentationError") {
            return ErrorCategory::Syntax;
        }
        if report.contains("AssertionError") || report.contains("FAILED") || report.contains("FAIL:") {
            return ErrorCategory::Assertion;
        }
        ErrorCategory::Other
    }

    /// 修复阶段使用的提示词变体
    pub fn prompt_variant(&self) -> Option<&'static str> {
        match self {
            ErrorCategory::FileNotFound => Some("file_not_found"),
            ErrorCategory::NameOrImport { .. } => Some("module_structure"),
            ErrorCategory::ModuleNotFound { .. } => Some("missing_module"),
            _ => None,
        }
    }

    pub fn heuristic(&self) -> Heuristic {
        match self {
            ErrorCategory::FileNotFound => Heuristic::FileSystemError,
            ErrorCategory::ModuleNotFound { .. } | ErrorCategory::NameOrImport { .. } => {
                Heuristic::ModuleError
            }
            ErrorCategory::Attribute { .. } => Heuristic::AttributeError,
            ErrorCategory::TypeMismatch { .. } => Heuristic::TypeError,
            _ => Heuristic::OtherError,
        }
    }

    /// 类相关错误中涉及的类名
    pub fn class_name(&self) -> Option<&str> {
        match self {
            ErrorCategory::Attribute { class, .. } | ErrorCategory::TypeMismatch { class } => {
                class.as_deref()
            }
            _ => None,
        }
    }
}

/// 报告中最后一个 `No module named 'x'` 的顶层包名
pub fn missing_module(report: &str) -> Option<String> {
    missing_module_re()
        .captures_iter(report)
        .last()
        .and_then(|caps| caps[1].split('.').next().map(str::to_string))
}

fn squash(name: &str) -> String {
    name.to_lowercase().replace(['_', '-'], "")
}

/// 缺失模块是否对应项目内的文件（应由开发者补写，而不是安装）
pub fn is_local_module(module: &str, store: &ArtifactStore) -> bool {
    let wanted = squash(module);
    store.files().keys().any(|name| {
        name.strip_suffix(".py")
            .map(|stem| squash(stem.rsplit('/').next().unwrap_or(stem)) == wanted)
            .unwrap_or(false)
    })
}

/// 报告中出现的、仓库里存在的文件（traceback 帧与 pytest 定位行）
pub fn implicated_files(report: &str, store: &ArtifactStore) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let locations = frame_re()
        .captures_iter(report)
        .chain(pytest_location_re().captures_iter(report))
        .map(|caps| caps[1].to_string());
    for location in locations {
        let trimmed = location.trim_start_matches("./");
        let found = if store.get(trimmed).is_some() {
            Some(trimmed.to_string())
        } else {
            let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
            store.get(base).map(|_| base.to_string())
        };
        if let Some(file) = found {
            if !out.contains(&file) {
                out.push(file);
            }
        }
    }
    out
}

/// 选出下一轮修复需要的相关文件，并记录触发的启发式
pub fn relevant_files(
    report: &str,
    category: &ErrorCategory,
    store: &ArtifactStore,
    graph: &DependencyGraph,
    diagnostics: &mut Diagnostics,
) -> Vec<String> {
    diagnostics.hit(category.heuristic());
    let implicated = implicated_files(report, store);
    let mut relevant: BTreeSet<String> = implicated.iter().cloned().collect();

    match (category, category.class_name()) {
        (ErrorCategory::ModuleNotFound { module }, _) if is_local_module(module, store) => {
            // 项目内模块找不到：引用方交给开发者补写
            for (name, code) in store.files() {
                if is_python_file(name) && imported_modules(code).iter().any(|m| m == module) {
                    relevant.insert(name.clone());
                }
            }
        }
        (_, Some(class)) => {
            diagnostics.hit(Heuristic::ClassLookup);
            for (name, code) in store.files() {
                if is_python_file(name) && defines_class(code, class) {
                    relevant.insert(name.clone());
                }
            }
        }
        _ => {
            if !implicated.is_empty() {
                diagnostics.hit(Heuristic::DependencyGraphQuery);
            }
            for file in &implicated {
                relevant.extend(graph.neighbors(file));
            }
        }
    }

    relevant.retain(|name| store.get(name).is_some());
    if relevant.is_empty() {
        tracing::debug!("no implicated files in report, using whole codebase");
        return store.files().keys().cloned().collect();
    }
    relevant.into_iter().collect()
}

/// 模块结构：每个源文件及其定义的类
pub fn module_structure(store: &ArtifactStore) -> String {
    let mut lines = Vec::new();
    for name in store.source_files() {
        let Some(code) = store.get(name) else {
            continue;
        };
        let classes = class_names(code);
        if classes.is_empty() {
            continue;
        }
        lines.push(name.to_string());
        lines.extend(classes.into_iter().map(|c| format!("\t- class {c}")));
    }
    lines.join("\n")
}

/// 项目目录下已有的图片资源路径（相对路径）
pub fn asset_paths(directory: &Path) -> String {
    let mut paths = Vec::new();
    for pattern in ["*.png", "*/*.png"] {
        let full = directory.join(pattern);
        let Ok(entries) = glob::glob(&full.to_string_lossy()) else {
            continue;
        };
        for path in entries.flatten() {
            if let Ok(relative) = path.strip_prefix(directory) {
                paths.push(format!("./{}", relative.display()));
            }
        }
    }
    paths.join("\n")
}
