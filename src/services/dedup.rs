//! 题干去重 - 业务能力层
//!
//! 纯函数，不依赖任何资源：
//! - `normalize`：小写、去掉 `[a-z0-9 ']` 以外的字符、合并空白
//! - `similarity`：有效词交集 / 较大的词集
//! - `is_near_duplicate`：完全相同 / 长文本包含 / 相似度超过阈值
//! - `count_distinct`：贪心聚类，返回代表题干数量

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// 默认近似重复阈值
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// 包含关系判定所需的最小长度
const CONTAINMENT_MIN_LEN: usize = 90;

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s']").expect("合法的正则"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("合法的正则"));

/// 通用 / 题目领域的填充词，不参与相似度计算
static STOP_WORDS: phf::Set<&'static str> = phf::phf_set! {
    "the", "and", "for", "with", "that", "this", "which", "what", "when", "where",
    "who", "whom", "how", "why", "are", "was", "were", "from", "into", "than",
    "most", "best", "likely", "following", "statement", "statements", "true",
    "false", "correct", "incorrect", "describes", "regarding", "about", "does",
    "not", "their", "these", "those",
};

/// 规范化题干
///
/// 幂等：`normalize(normalize(x)) == normalize(x)`
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = DISALLOWED.replace_all(&lowered, "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

/// 提取有效词：长度大于 2 且不在停用词表中
pub fn tokens(text: &str) -> HashSet<String> {
    normalize(text)
        .split(' ')
        .filter(|t| t.chars().count() > 2 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// 词重叠相似度，任一词集为空时为 0
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    shared as f64 / ta.len().max(tb.len()) as f64
}

/// 是否近似重复（对称）
pub fn is_near_duplicate(a: &str, b: &str, threshold: f64) -> bool {
    let na = normalize(a);
    let nb = normalize(b);
    if na == nb {
        return true;
    }
    let long_enough = na.len() >= CONTAINMENT_MIN_LEN || nb.len() >= CONTAINMENT_MIN_LEN;
    if long_enough && (na.contains(&nb) || nb.contains(&na)) {
        return true;
    }
    similarity(&na, &nb) >= threshold
}

/// 贪心统计互不重复的题干数量
///
/// 复杂度为 O(n * 代表数)，调用方保证输入已按采样上限截断
pub fn count_distinct<S: AsRef<str>>(stems: &[S], threshold: f64) -> usize {
    let mut representatives: Vec<&str> = Vec::new();
    for stem in stems {
        let stem = stem.as_ref();
        if !representatives
            .iter()
            .any(|rep| is_near_duplicate(rep, stem, threshold))
        {
            representatives.push(stem);
        }
    }
    representatives.len()
}
