//! Python 源码静态分析（tree-sitter）
//!
//! - 语法是否有效（抽取级联对 .py 文件的校验）
//! - import 的模块名（依赖图）
//! - 顶层是否存在入口语句（测试循环的 "no entry point" 判定）
//! - 类名（正则扫描，供 AttributeError / TypeError 定位）

use std::cell::RefCell;
use std::sync::OnceLock;

use regex::Regex;
use tree_sitter::{Node, Parser, Tree};

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // 语言加载失败时 parse 返回 None，由调用方按无效处理
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

fn parse(code: &str) -> Option<Tree> {
    PYTHON_PARSER.with(|p| p.borrow_mut().parse(code, None))
}

fn class_def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"class\s+([A-Za-z_]\w*)").expect("valid class regex"))
}

/// 文件名是否为 Python 源文件
pub fn is_python_file(filename: &str) -> bool {
    filename.ends_with(".py")
}

/// 能解析且语法树中没有 ERROR / MISSING 节点
pub fn is_valid_python(code: &str) -> bool {
    match parse(code) {
        Some(tree) => !tree.root_node().has_error(),
        None => false,
    }
}

/// 源码中定义的类名（按出现顺序）
pub fn class_names(code: &str) -> Vec<String> {
    class_def_re()
        .captures_iter(code)
        .map(|c| c[1].to_string())
        .collect()
}

/// 源码是否定义了某个类（整词匹配）
pub fn defines_class(code: &str, class_name: &str) -> bool {
    class_names(code).iter().any(|c| c == class_name)
}

fn text<'a>(node: &Node, code: &'a str) -> &'a str {
    node.utf8_text(code.as_bytes()).unwrap_or("")
}

fn imported_name(node: &Node, code: &str) -> Option<String> {
    match node.kind() {
        "dotted_name" => Some(text(node, code).to_string()),
        "aliased_import" => node
            .child_by_field_name("name")
            .map(|n| text(&n, code).to_string()),
        _ => None,
    }
}

/// 所有 import 语句引用的模块名；相对导入去掉前导点，`from . import x` 记为 x
pub fn imported_modules(code: &str) -> Vec<String> {
    let Some(tree) = parse(code) else {
        return Vec::new();
    };
    let root = tree.root_node();
    let mut modules = Vec::new();
    let mut cursor = root.walk();

    loop {
        let node = cursor.node();
        match node.kind() {
            "import_statement" => {
                let mut inner = node.walk();
                for child in node.named_children(&mut inner) {
                    if let Some(name) = imported_name(&child, code) {
                        modules.push(name);
                    }
                }
            }
            "import_from_statement" => {
                let module = node
                    .child_by_field_name("module_name")
                    .map(|n| text(&n, code).trim_start_matches('.').to_string())
                    .unwrap_or_default();
                if module.is_empty() {
                    let mut inner = node.walk();
                    for child in node.children_by_field_name("name", &mut inner) {
                        if let Some(name) = imported_name(&child, code) {
                            modules.push(name);
                        }
                    }
                } else {
                    modules.push(module);
                }
            }
            _ => {}
        }

        if cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return modules;
            }
        }
    }
}

/// 顶层是否存在除表达式、import、函数 / 类定义以外的语句（如 `if __name__ == "__main__":`）
pub fn has_entry_point(code: &str) -> bool {
    let Some(tree) = parse(code) else {
        return false;
    };
    let root = tree.root_node();
    let mut cursor = root.walk();
    let found = root.named_children(&mut cursor).any(|node| {
        !matches!(
            node.kind(),
            "expression_statement"
                | "import_statement"
                | "import_from_statement"
                | "future_import_statement"
                | "function_definition"
                | "class_definition"
                | "decorated_definition"
                | "comment"
        )
    });
    found
}
