//! 相似度：句级 BLEU-4（无平滑）
//!
//! 用于近重复检测：新代码块与已有文件的相似度超过阈值时视为同一文件的更新。
//! 源码按标识符与符号切分（代码感知），其它文本按空白切分。

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

const MAX_ORDER: usize = 4;

fn code_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+|[^\w\s]").expect("valid token regex"))
}

/// 按空白切分
pub fn whitespace_tokens(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// 标识符 / 数字 / 单个符号
pub fn code_tokens(text: &str) -> Vec<&str> {
    code_token_re().find_iter(text).map(|m| m.as_str()).collect()
}

fn ngram_counts<'t, 'a>(tokens: &'t [&'a str], n: usize) -> HashMap<&'t [&'a str], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for window in tokens.windows(n) {
            *counts.entry(window).or_insert(0) += 1;
        }
    }
    counts
}

/// 句级 BLEU：四阶 n-gram 精度几何平均乘以简短惩罚；任一阶无匹配即为 0
pub fn bleu(reference: &[&str], candidate: &[&str]) -> f64 {
    if candidate.is_empty() || reference.is_empty() {
        return 0.0;
    }
    let mut log_sum = 0.0;
    for n in 1..=MAX_ORDER {
        let cand = ngram_counts(candidate, n);
        let total: usize = cand.values().sum();
        if total == 0 {
            return 0.0;
        }
        let refs = ngram_counts(reference, n);
        let clipped: usize = cand
            .iter()
            .map(|(gram, count)| (*count).min(refs.get(*gram).copied().unwrap_or(0)))
            .sum();
        if clipped == 0 {
            return 0.0;
        }
        log_sum += (clipped as f64 / total as f64).ln();
    }
    let c = candidate.len() as f64;
    let r = reference.len() as f64;
    let brevity = if c > r { 1.0 } else { (1.0 - r / c).exp() };
    brevity * (log_sum / MAX_ORDER as f64).exp()
}

/// 文件内容相似度；code_aware 为 true 时使用代码切分
pub fn similarity(reference: &str, candidate: &str, code_aware: bool) -> f64 {
    if code_aware {
        bleu(&code_tokens(reference), &code_tokens(candidate))
    } else {
        bleu(&whitespace_tokens(reference), &whitespace_tokens(candidate))
    }
}
