//! 单步决策 - 纯函数
//!
//! `(任务状态, 快照数量, 本批结果) → StepDecision`
//!
//! 不做任何 I/O，落盘由 `BackfillFlow` 负责。每条路径都会给出终态或续跑任务，
//! 章节不会停留在 GENERATING 而没有后续

use serde_json::Value as JsonValue;

use crate::config::BackfillPolicy;
use crate::models::{
    BackfillJob, JobStatus, JobUpdate, NewJob, QuestionsStatus, SectionUpdate, StepDecision,
};
use crate::services::PersistOutcome;

/// 本步生成阶段的结果
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResult {
    /// 规划器决定不调用生成器
    Skipped,
    /// 生成并落盘成功（可能 0 道）
    Generated {
        persist: PersistOutcome,
        ai_request_count: u32,
        new_stats: Option<JsonValue>,
    },
    /// 生成器 / 规划器失败，或没有任何可用输出
    ///
    /// 空输出或全部无效时 `new_stats` 带上零产出的统计
    Failed {
        error: String,
        ai_request_count: u32,
        new_stats: Option<JsonValue>,
    },
}

/// 本步的目标：min(target, count + step_increment)
pub fn next_target(job: &BackfillJob, count: u32, policy: &BackfillPolicy) -> u32 {
    job.target_count
        .min(count.saturating_add(policy.step_increment))
}

/// 调用生成器之前的检查
///
/// 已达标或预算耗尽时直接给出终态，返回 None 表示需要生成
pub fn precheck(job: &BackfillJob, count: u32, policy: &BackfillPolicy) -> Option<StepDecision> {
    if count >= job.target_count {
        return Some(StepDecision {
            job_update: JobUpdate::idle(JobStatus::Completed, count)
                .with_message(format!("已达到目标 {}/{}", count, job.target_count)),
            section_update: Some(SectionUpdate::new(QuestionsStatus::Completed, count)),
            next_job: None,
        });
    }

    if job.budget_exhausted(policy.stall_limit) {
        let reason = exhaustion_reason(job, job.no_progress_streak, policy);
        return Some(resolve_terminal(
            JobUpdate::idle(JobStatus::Completed, count),
            job,
            count,
            &reason,
        ));
    }

    None
}

/// 根据本批结果决定终止还是续跑
pub fn decide(
    job: &BackfillJob,
    count: u32,
    result: BatchResult,
    policy: &BackfillPolicy,
) -> StepDecision {
    match result {
        BatchResult::Failed {
            error,
            ai_request_count,
            new_stats,
        } => {
            let streak = job.no_progress_streak + 1;
            let base = JobUpdate {
                ai_request_count,
                ..JobUpdate::idle(JobStatus::Completed, count)
            }
            .with_error(error.clone());

            if attempts_used_up(job, streak, policy) {
                let reason = format!("{}；{}", error, exhaustion_reason(job, streak, policy));
                let mut decision = resolve_terminal(base, job, count, &reason);
                if let Some(section) = decision.section_update.as_mut() {
                    section.gen_stats = new_stats;
                }
                return decision;
            }

            StepDecision {
                job_update: base.with_message(format!(
                    "生成失败，已排队第 {} 次尝试",
                    job.attempt + 1
                )),
                section_update: Some(
                    SectionUpdate::new(QuestionsStatus::Generating, count)
                        .with_error(error)
                        .with_stats(new_stats),
                ),
                next_job: Some(NewJob::continuation(job, streak)),
            }
        }

        BatchResult::Skipped => decide(
            job,
            count,
            BatchResult::Generated {
                persist: PersistOutcome::default(),
                ai_request_count: 0,
                new_stats: None,
            },
            policy,
        ),

        BatchResult::Generated {
            persist,
            ai_request_count,
            new_stats,
        } => {
            let final_count = count + persist.generated_now;
            let streak = if persist.generated_now > 0 {
                0
            } else {
                job.no_progress_streak + 1
            };
            let base = JobUpdate {
                status: JobStatus::Completed,
                final_count,
                generated_now: persist.generated_now,
                skipped_count: persist.skipped_count,
                duplicate_skipped: persist.duplicate_stem_skipped,
                ai_request_count,
                error: None,
                message: None,
            };

            if final_count >= job.target_count {
                return StepDecision {
                    job_update: base.with_message(format!(
                        "已达到目标 {}/{}",
                        final_count, job.target_count
                    )),
                    section_update: Some(
                        SectionUpdate::new(QuestionsStatus::Completed, final_count)
                            .with_stats(new_stats),
                    ),
                    next_job: None,
                };
            }

            if attempts_used_up(job, streak, policy) {
                let reason = exhaustion_reason(job, streak, policy);
                let mut decision = resolve_terminal(base, job, final_count, &reason);
                if let Some(section) = decision.section_update.as_mut() {
                    section.gen_stats = new_stats;
                }
                return decision;
            }

            StepDecision {
                job_update: base.with_message(format!(
                    "本批新增 {} 道 ({}/{})，已排队第 {} 次尝试",
                    persist.generated_now,
                    final_count,
                    job.target_count,
                    job.attempt + 1
                )),
                section_update: Some(
                    SectionUpdate::new(QuestionsStatus::Generating, final_count)
                        .with_stats(new_stats),
                ),
                next_job: Some(NewJob::continuation(job, streak)),
            }
        }
    }
}

/// 预算耗尽时的终态：有题目算部分完成，否则失败
pub fn resolve_terminal(
    base: JobUpdate,
    job: &BackfillJob,
    final_count: u32,
    reason: &str,
) -> StepDecision {
    if final_count > 0 {
        let message = format!(
            "部分完成 {}/{}：{}",
            final_count, job.target_count, reason
        );
        StepDecision {
            job_update: JobUpdate {
                status: JobStatus::Completed,
                final_count,
                ..base
            }
            .with_message(message),
            section_update: Some(SectionUpdate::new(QuestionsStatus::Completed, final_count)),
            next_job: None,
        }
    } else {
        StepDecision {
            job_update: JobUpdate {
                status: JobStatus::Failed,
                final_count,
                ..base
            }
            .with_error(reason),
            section_update: Some(
                SectionUpdate::new(QuestionsStatus::Failed, final_count).with_error(reason),
            ),
            next_job: None,
        }
    }
}

/// 任务参数无效：任务直接失败，不续跑
///
/// `section_count` 为 Some 时表示章节存在且属于该课程，同步标记章节失败
pub fn reject(reason: &str, section_count: Option<u32>) -> StepDecision {
    StepDecision {
        job_update: JobUpdate::idle(JobStatus::Failed, section_count.unwrap_or(0))
            .with_error(reason),
        section_update: section_count
            .map(|count| SectionUpdate::new(QuestionsStatus::Failed, count).with_error(reason)),
        next_job: None,
    }
}

/// 意外错误后的兜底终态
///
/// `count` 为重新读取到的题目数量
pub fn recover(count: u32, error: &str) -> StepDecision {
    let status = if count > 0 {
        JobStatus::Completed
    } else {
        JobStatus::Failed
    };
    let section_status = if count > 0 {
        QuestionsStatus::Completed
    } else {
        QuestionsStatus::Failed
    };
    StepDecision {
        job_update: JobUpdate::idle(status, count).with_error(error),
        section_update: Some(SectionUpdate::new(section_status, count).with_error(error)),
        next_job: None,
    }
}

/// 租约过期的任务：自身记为失败，预算允许时续跑
pub fn abandon(job: &BackfillJob, count: u32, policy: &BackfillPolicy) -> StepDecision {
    let mut decision = decide(
        job,
        count,
        BatchResult::Failed {
            error: "任务租约过期，视为中途崩溃".to_string(),
            ai_request_count: 0,
            new_stats: None,
        },
        policy,
    );
    decision.job_update.status = JobStatus::Failed;
    decision
}

/// 再续跑一次是否会超出预算
fn attempts_used_up(job: &BackfillJob, streak: u32, policy: &BackfillPolicy) -> bool {
    job.attempt >= job.max_attempts || streak >= policy.stall_limit
}

fn exhaustion_reason(job: &BackfillJob, streak: u32, policy: &BackfillPolicy) -> String {
    if streak >= policy.stall_limit {
        format!("连续 {} 次没有新增题目", streak)
    } else {
        format!("已用完 {} 次尝试", job.max_attempts)
    }
}
