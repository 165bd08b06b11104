//! 已有题目快照
//!
//! 每一步开始时重新读取，只读，不在原地修改；下一步用新的快照替换

use std::collections::HashSet;

use crate::services::dedup;

/// 章节已有题目的时点快照
#[derive(Debug, Clone, Default)]
pub struct ExistingSnapshot {
    /// 已持久化的题目总数（不受采样上限影响）
    pub count: u32,
    /// 采样题干聚类后的数量
    pub distinct_count: usize,
    /// 采样到的题干（最多 sample_limit 条）
    pub stems: Vec<String>,
    /// 采样题干的规范化键
    keys: HashSet<String>,
}

impl ExistingSnapshot {
    pub fn new(count: u32, stems: Vec<String>, threshold: f64) -> Self {
        let distinct_count = dedup::count_distinct(&stems, threshold);
        let keys = stems.iter().map(|s| dedup::normalize(s)).collect();
        Self {
            count,
            distinct_count,
            stems,
            keys,
        }
    }

    /// 规范化键是否已存在
    pub fn contains_key(&self, stem_key: &str) -> bool {
        self.keys.contains(stem_key)
    }
}
