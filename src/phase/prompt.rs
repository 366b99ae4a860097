//! 提示词模板：`{key}` 占位符替换

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("valid regex"))
}

/// 替换已知占位符；未知的保持原样，替换结果不再二次展开
pub fn render(template: &str, placeholders: &BTreeMap<String, String>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &Captures| {
            placeholders
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// 模板中没有取值的占位符
pub fn unresolved(template: &str, placeholders: &BTreeMap<String, String>) -> Vec<String> {
    let mut out: Vec<String> = placeholder_re()
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .filter(|key| !placeholders.contains_key(key))
        .collect();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_known_and_unknown() {
        let out = render(
            "Task: {task}\nLanguage: {language}\nKeep {unknown}",
            &vars(&[("task", "snake game"), ("language", "Python")]),
        );
        assert_eq!(out, "Task: snake game\nLanguage: Python\nKeep {unknown}");
    }

    #[test]
    fn test_render_does_not_expand_values() {
        let out = render("{codes}", &vars(&[("codes", "print('{task}')"), ("task", "x")]));
        assert_eq!(out, "print('{task}')");
    }

    #[test]
    fn test_unresolved_placeholders() {
        let missing = unresolved("{task} {gui} {task}", &vars(&[("task", "t")]));
        assert_eq!(missing, vec!["gui".to_string()]);
    }
}
