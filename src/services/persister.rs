//! 批量落盘 - 业务能力层
//!
//! 校验 → 去重 → 附加元数据 → 原子批量写入，返回本批计数

use std::time::Instant;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::BackfillResult;
use crate::infrastructure::{BackfillStore, MAX_BATCH_WRITES};
use crate::models::{ExistingSnapshot, Question, QuestionDefaults};
use crate::services::{dedup, normalizer};

/// 本批落盘结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    /// 实际写入的数量
    pub generated_now: u32,
    /// 规范化失败（缺题干/选项）的数量
    pub skipped_count: u32,
    /// 因题干重复丢弃的数量
    pub duplicate_stem_skipped: u32,
    /// 本步所需数量已满后未处理的候选数量
    pub surplus_skipped: u32,
    /// 生成器返回的原始数量，等于上面四项之和
    pub raw_generated: u32,
    pub elapsed_ms: u64,
}

/// 过滤结果（纯计算，不落盘）
#[derive(Debug, Default)]
pub struct FilteredBatch {
    pub accepted: Vec<Question>,
    pub invalid: u32,
    pub duplicates: u32,
    /// 达到上限后剩余的候选
    pub surplus: u32,
}

/// 过滤一批原始题目
///
/// 与快照及本批已接受的题干逐一做近似重复判断，最多接受 `limit` 道
pub fn filter_batch(
    raw: &[JsonValue],
    snapshot: &ExistingSnapshot,
    defaults: &QuestionDefaults,
    threshold: f64,
    limit: usize,
) -> FilteredBatch {
    let mut batch = FilteredBatch::default();

    for (index, candidate) in raw.iter().enumerate() {
        if batch.accepted.len() >= limit {
            batch.surplus = (raw.len() - index) as u32;
            break;
        }
        let Some(question) = normalizer::normalize(candidate, defaults) else {
            batch.invalid += 1;
            continue;
        };

        // 规范化后为空的题干（如纯中文）无法参与去重
        let stem_key = dedup::normalize(&question.stem);
        if stem_key.is_empty() {
            batch.invalid += 1;
            continue;
        }

        let duplicate = snapshot.contains_key(&stem_key)
            || snapshot
                .stems
                .iter()
                .any(|s| dedup::is_near_duplicate(s, &stem_key, threshold))
            || batch
                .accepted
                .iter()
                .any(|q| dedup::is_near_duplicate(&q.stem, &stem_key, threshold));

        if duplicate {
            batch.duplicates += 1;
            continue;
        }
        batch.accepted.push(question);
    }

    batch
}

/// 批量落盘
pub struct BatchPersister {
    threshold: f64,
}

impl BatchPersister {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// 以任务 `job_id` 的身份过滤并写入一批题目，`limit` 为本步还需要的数量
    ///
    /// 任务已不再是 RUNNING 时存储拒绝写入，返回 `InvalidTransition`
    pub async fn persist(
        &self,
        store: &dyn BackfillStore,
        job_id: &str,
        raw: &[JsonValue],
        snapshot: &ExistingSnapshot,
        defaults: &QuestionDefaults,
        limit: usize,
    ) -> BackfillResult<PersistOutcome> {
        let started = Instant::now();
        let batch = filter_batch(raw, snapshot, defaults, self.threshold, limit);

        let mut written = 0usize;
        let mut accepted = batch.accepted;
        while !accepted.is_empty() {
            let rest = accepted.split_off(accepted.len().min(MAX_BATCH_WRITES));
            written += store
                .insert_job_questions(job_id, &defaults.course_id, &defaults.section_id, accepted)
                .await?;
            accepted = rest;
        }

        let outcome = PersistOutcome {
            generated_now: written as u32,
            skipped_count: batch.invalid,
            duplicate_stem_skipped: batch.duplicates,
            surplus_skipped: batch.surplus,
            raw_generated: raw.len() as u32,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        debug!(
            "落盘: 原始 {}, 写入 {}, 无效 {}, 重复 {}, 超额 {}",
            outcome.raw_generated,
            outcome.generated_now,
            outcome.skipped_count,
            outcome.duplicate_stem_skipped,
            outcome.surplus_skipped
        );
        Ok(outcome)
    }
}
