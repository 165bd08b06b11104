//! 单门课程播种 - 编排层
//!
//! ## 职责
//!
//! 把一个课程种子文件落到存储里，并为每个章节触发回填：
//!
//! 1. **写入章节**：新章节直接写入；已有章节只刷新出题蓝图，保留计数和统计
//! 2. **触发回填**：为每个章节入队第一条任务（已有进行中的任务链则跳过）
//! 3. **统计输出**：记录入队 / 跳过数量

use tracing::{info, warn};

use crate::config::BackfillPolicy;
use crate::error::BackfillResult;
use crate::infrastructure::{BackfillStore, EnqueueOutcome};
use crate::models::{CourseSeed, NewJob, SectionSeed};

/// 播种统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedStats {
    pub sections: usize,
    pub enqueued: usize,
    pub already_active: usize,
}

/// 播种单门课程
pub async fn seed_course(
    store: &dyn BackfillStore,
    course: &CourseSeed,
    policy: &BackfillPolicy,
) -> BackfillResult<SeedStats> {
    info!(
        "📚 课程 {} ({}): {} 个章节",
        course.course_id,
        course.name,
        course.sections.len()
    );

    let mut stats = SeedStats::default();
    for seed in &course.sections {
        upsert_section(store, &course.course_id, seed).await?;
        stats.sections += 1;

        let new = NewJob::initial(&course.course_id, &seed.id, seed.target_count, policy);
        match store.enqueue_backfill(new).await? {
            EnqueueOutcome::Created(job) => {
                info!(
                    "  ✓ 章节 {} 已入队 (目标 {}, 最多 {} 次)",
                    seed.id, job.target_count, job.max_attempts
                );
                stats.enqueued += 1;
            }
            EnqueueOutcome::AlreadyActive { job_id } => {
                warn!("  ⏭️ 章节 {} 已有进行中的任务 {}，跳过", seed.id, job_id);
                stats.already_active += 1;
            }
        }
    }

    Ok(stats)
}

async fn upsert_section(
    store: &dyn BackfillStore,
    course_id: &str,
    seed: &SectionSeed,
) -> BackfillResult<()> {
    let fresh = seed.to_section(course_id);
    let section = match store.get_section(course_id, &seed.id).await? {
        Some(mut existing) if existing.course_id == course_id => {
            if fresh.blueprint.is_some() {
                existing.blueprint = fresh.blueprint;
            }
            existing
        }
        _ => fresh,
    };
    store.upsert_section(section).await
}
