//! 回填流程 - 流程层
//!
//! 核心职责：定义"一次任务调用"的完整处理流程
//!
//! 流程顺序：
//! 1. 认领（CAS，失败即静默返回）
//! 2. 校验参数 → 读取快照 → 达标 / 预算检查
//! 3. 规划 → 生成 → 去重落盘
//! 4. 决策 → 原子提交（终态或续跑任务）
//! 5. 任何意外错误：重新读取题目数量，兜底写入终态
//!
//! 生成调用必须在租约到期（减去安全余量）之前结束，
//! 写入题目时存储层还会确认任务仍处于 RUNNING，
//! 所以被回收的任务不会再写入任何数据

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::{BackfillPolicy, Config};
use crate::error::{BackfillError, BackfillResult};
use crate::infrastructure::BackfillStore;
use crate::models::{
    BackfillJob, ExistingSnapshot, GenerationBlueprint, JobStatus, QuestionDefaults, Section,
    StepDecision,
};
use crate::services::{
    build_prompts, BatchPersister, BatchSample, GenerateOptions, Generator, Planner,
    RequestPlan,
};
use crate::workflow::backfill_ctx::BackfillCtx;
use crate::workflow::step::{self, BatchResult};

/// 一次调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 没有认领到任务（已被处理或不存在），无副作用
    NotClaimed,
    /// 已排队续跑任务
    Continued { next_job_id: String, count: u32 },
    /// 任务链结束
    Finished { status: JobStatus, final_count: u32 },
    /// 处理期间租约已被回收，本次调用的结果全部丢弃
    LeaseLost,
}

/// 回填流程
///
/// - 编排一次调用的完整流程
/// - 决定何时短路、何时生成、何时续跑
/// - 不持有任何状态，所有数据都来自存储
pub struct BackfillFlow {
    store: Arc<dyn BackfillStore>,
    planner: Arc<dyn Planner>,
    generator: Arc<dyn Generator>,
    persister: BatchPersister,
    policy: BackfillPolicy,
    lease: Duration,
    lease_margin: Duration,
    generation_timeout: Duration,
    verbose_logging: bool,
}

impl BackfillFlow {
    /// 创建新的回填流程
    pub fn new(
        config: &Config,
        store: Arc<dyn BackfillStore>,
        planner: Arc<dyn Planner>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            store,
            planner,
            generator,
            persister: BatchPersister::new(config.policy.dedup_threshold),
            policy: config.policy.clone(),
            lease: Duration::from_millis(config.lease_ms),
            lease_margin: Duration::from_millis(config.lease_margin_ms),
            generation_timeout: Duration::from_millis(config.generation_timeout_ms),
            verbose_logging: config.verbose_logging,
        }
    }

    /// 处理一条任务
    ///
    /// 不返回错误：除了认领失败和租约丢失，每条路径都会写入终态或续跑任务
    pub async fn run(&self, job_id: &str) -> RunOutcome {
        let job = match self.store.claim_job(job_id, self.lease).await {
            Ok(job) => job,
            Err(e) if e.is_claim_conflict() => {
                debug!("任务 {} 已被认领，跳过", job_id);
                return RunOutcome::NotClaimed;
            }
            Err(e) => {
                warn!("⚠️ 认领任务 {} 失败: {}", job_id, e);
                return RunOutcome::NotClaimed;
            }
        };

        let ctx = BackfillCtx::from_job(&job);
        let started = Instant::now();
        info!(
            "{} ▶️ 开始处理 (目标 {}, 连续无进展 {})",
            ctx, job.target_count, job.no_progress_streak
        );

        let result = AssertUnwindSafe(self.step(&job, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(BackfillError::Store(panic_message(&*panic))));

        let committed = match result {
            Ok(decision) => {
                let decision = decision.with_duration(started.elapsed().as_millis() as u64);
                self.commit(&job, &ctx, decision).await
            }
            Err(e) => Err(e),
        };

        match committed {
            Ok(outcome) => outcome,
            Err(e) => self.recover(&job, &ctx, e, started).await,
        }
    }

    /// 一步的业务逻辑，返回待提交的决策
    async fn step(&self, job: &BackfillJob, ctx: &BackfillCtx) -> BackfillResult<StepDecision> {
        // ========== 校验参数 ==========
        let (section, blueprint) = match self.validate(job).await? {
            Ok(valid) => valid,
            Err(rejection) => {
                warn!("{} ❌ 参数无效: {:?}", ctx, rejection.job_update.error);
                return Ok(rejection);
            }
        };

        // ========== 快照 ==========
        let snapshot = self.snapshot(&section).await?;
        debug!(
            "{} 快照: 已有 {} 道 (采样去重后 {} 道)",
            ctx, snapshot.count, snapshot.distinct_count
        );

        // ========== 达标 / 预算检查 ==========
        if let Some(decision) = step::precheck(job, snapshot.count, &self.policy) {
            info!(
                "{} ⏹️ 无需生成: {}",
                ctx,
                decision
                    .job_update
                    .message
                    .as_deref()
                    .or(decision.job_update.error.as_deref())
                    .unwrap_or_default()
            );
            return Ok(decision);
        }

        // ========== 规划 → 生成 → 落盘 ==========
        let result = self.generate_batch(&section, &blueprint, &snapshot, job, ctx).await?;
        Ok(step::decide(job, snapshot.count, result, &self.policy))
    }

    /// 校验任务参数
    ///
    /// 外层错误为存储错误；内层 Err 为拒绝决策
    async fn validate(
        &self,
        job: &BackfillJob,
    ) -> BackfillResult<Result<(Section, GenerationBlueprint), StepDecision>> {
        let (Some(course_id), Some(section_id)) = (&job.course_id, &job.section_id) else {
            return Ok(Err(step::reject("缺少 courseId 或 sectionId", None)));
        };

        let Some(section) = self.store.get_section(course_id, section_id).await? else {
            return Ok(Err(step::reject(
                &format!("章节不存在: {}", section_id),
                None,
            )));
        };

        if &section.course_id != course_id {
            return Ok(Err(step::reject(
                &format!("章节 {} 不属于课程 {}", section_id, course_id),
                None,
            )));
        }

        let Some(blueprint) = section.blueprint.clone() else {
            return Ok(Err(step::reject(
                &format!("章节 {} 尚未生成出题蓝图", section_id),
                Some(section.questions_count),
            )));
        };

        Ok(Ok((section, blueprint)))
    }

    /// 读取已有题目快照
    async fn snapshot(&self, section: &Section) -> BackfillResult<ExistingSnapshot> {
        let count = self
            .store
            .count_questions(&section.course_id, &section.id)
            .await?;
        let stems = self
            .store
            .sample_stems(&section.course_id, &section.id, self.policy.sample_limit)
            .await?;
        Ok(ExistingSnapshot::new(
            count,
            stems,
            self.policy.dedup_threshold,
        ))
    }

    /// 规划、调用生成器并落盘
    ///
    /// 生成失败不算错误，归入 `BatchResult::Failed`；只有存储错误才向上返回
    async fn generate_batch(
        &self,
        section: &Section,
        blueprint: &GenerationBlueprint,
        snapshot: &ExistingSnapshot,
        job: &BackfillJob,
        ctx: &BackfillCtx,
    ) -> BackfillResult<BatchResult> {
        let target = step::next_target(job, snapshot.count, &self.policy);
        let requested = target.saturating_sub(snapshot.count);
        let plan = self
            .planner
            .plan(requested, snapshot.count, &section.question_gen_stats);

        if plan.skip_ai {
            info!("{} ⏭️ 规划器跳过本次生成", ctx);
            return Ok(BatchResult::Skipped);
        }

        info!(
            "{} 🤖 请求生成 {} 道 (本步目标 {}, 预测产出率 {:.2}, 预计节省 {:.0}%)",
            ctx,
            plan.ai_request_count,
            target,
            plan.predicted_yield,
            plan.estimated_savings_percent
        );

        let Some(remaining) = self.lease_remaining(job) else {
            warn!("{} ⚠️ 租约剩余时间不足，跳过生成", ctx);
            return Ok(BatchResult::Failed {
                error: "租约剩余时间不足".to_string(),
                ai_request_count: plan.ai_request_count,
                new_stats: None,
            });
        };

        let (system_prompt, user_prompt) =
            build_prompts(blueprint, plan.ai_request_count, &snapshot.stems);
        let opts = GenerateOptions {
            request_count: plan.ai_request_count,
            token_budget: plan.token_budget,
            retries: plan.retries,
            rate_limit_max_retries: plan.rate_limit_max_retries,
            rate_limit_retry_delay_ms: plan.rate_limit_retry_delay_ms,
            timeout: self.generation_timeout.min(remaining),
        };

        let generation_started = Instant::now();
        let generated = tokio::time::timeout(
            remaining,
            self.generator.generate(&system_prompt, &user_prompt, &opts),
        )
        .await;
        let latency_ms = generation_started.elapsed().as_millis() as u64;

        let batch = match generated {
            Ok(Ok(batch)) if batch.questions.is_empty() => {
                warn!("{} ⚠️ 生成器返回空结果", ctx);
                let new_stats = self.zero_yield_stats(section, &plan, latency_ms);
                return Ok(BatchResult::Failed {
                    error: "生成器没有返回任何题目".to_string(),
                    ai_request_count: plan.ai_request_count,
                    new_stats: Some(new_stats),
                });
            }
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                warn!("{} ⚠️ 生成失败: {}", ctx, e);
                return Ok(BatchResult::Failed {
                    error: e.to_string(),
                    ai_request_count: plan.ai_request_count,
                    new_stats: None,
                });
            }
            Err(_) => {
                warn!("{} ⏱️ 生成超出租约期限 ({}ms)", ctx, remaining.as_millis());
                return Ok(BatchResult::Failed {
                    error: format!("生成超出租约期限 ({}ms)", remaining.as_millis()),
                    ai_request_count: plan.ai_request_count,
                    new_stats: None,
                });
            }
        };

        let defaults = QuestionDefaults {
            course_id: section.course_id.clone(),
            section_id: section.id.clone(),
            topic_tags: blueprint.topic_tags.clone(),
            source_file_id: blueprint.source_file_id.clone(),
            source_label: blueprint
                .source_label
                .clone()
                .or_else(|| Some(blueprint.title.clone())),
        };

        let persist = self
            .persister
            .persist(
                self.store.as_ref(),
                &job.id,
                &batch.questions,
                snapshot,
                &defaults,
                requested as usize,
            )
            .await?;

        info!(
            "{} ✓ 模型 {} 返回 {} 道，写入 {}，无效 {}，重复 {}，超额 {}",
            ctx,
            batch.model,
            persist.raw_generated,
            persist.generated_now,
            persist.skipped_count,
            persist.duplicate_stem_skipped,
            persist.surplus_skipped
        );
        if self.verbose_logging {
            for raw in batch.questions.iter().take(3) {
                let stem = raw.get("stem").and_then(|v| v.as_str()).unwrap_or_default();
                debug!("{}   题干: {}", ctx, crate::utils::truncate_text(stem, 80));
            }
        }

        if persist.generated_now == 0 && persist.duplicate_stem_skipped == 0 {
            let new_stats = self.zero_yield_stats(section, &plan, latency_ms);
            return Ok(BatchResult::Failed {
                error: format!("{} 道候选题目全部无效", persist.raw_generated),
                ai_request_count: plan.ai_request_count,
                new_stats: Some(new_stats),
            });
        }

        let new_stats = self.planner.update_stats(
            &section.question_gen_stats,
            &BatchSample {
                ai_request_count: plan.ai_request_count,
                valid_produced: persist.generated_now,
                duplicate_skipped: persist.duplicate_stem_skipped,
                latency_ms,
                token_budget: plan.token_budget,
            },
        );

        Ok(BatchResult::Generated {
            persist,
            ai_request_count: plan.ai_request_count,
            new_stats: Some(new_stats),
        })
    }

    /// 租约到期前（减去安全余量）还剩多少时间，不足时返回 None
    fn lease_remaining(&self, job: &BackfillJob) -> Option<Duration> {
        let Some(expires_at) = job.lease_expires_at else {
            return Some(self.generation_timeout);
        };
        (expires_at - chrono::Utc::now())
            .to_std()
            .ok()?
            .checked_sub(self.lease_margin)
            .filter(|remaining| !remaining.is_zero())
    }

    /// 本批没有有效产出时的统计更新
    fn zero_yield_stats(
        &self,
        section: &Section,
        plan: &RequestPlan,
        latency_ms: u64,
    ) -> serde_json::Value {
        self.planner.update_stats(
            &section.question_gen_stats,
            &BatchSample {
                ai_request_count: plan.ai_request_count,
                valid_produced: 0,
                duplicate_skipped: 0,
                latency_ms,
                token_budget: plan.token_budget,
            },
        )
    }

    /// 原子提交决策
    async fn commit(
        &self,
        job: &BackfillJob,
        ctx: &BackfillCtx,
        decision: StepDecision,
    ) -> BackfillResult<RunOutcome> {
        let status = decision.job_update.status;
        let final_count = decision.job_update.final_count;
        let next = self.store.commit_step(&job.id, decision).await?;

        Ok(match next {
            Some(next) => {
                info!(
                    "{} 🔁 已有 {} 道，排队第 {} 次尝试",
                    ctx, final_count, next.attempt
                );
                RunOutcome::Continued {
                    next_job_id: next.id,
                    count: final_count,
                }
            }
            None => {
                match status {
                    JobStatus::Failed => warn!("{} ❌ 任务链失败 (共 {} 道)", ctx, final_count),
                    _ => info!("{} ✅ 任务链完成 (共 {} 道)", ctx, final_count),
                }
                RunOutcome::Finished {
                    status,
                    final_count,
                }
            }
        })
    }

    /// 兜底：重新读取题目数量，写入终态，保证章节不会卡在 GENERATING
    async fn recover(
        &self,
        job: &BackfillJob,
        ctx: &BackfillCtx,
        err: BackfillError,
        started: Instant,
    ) -> RunOutcome {
        if let BackfillError::InvalidTransition { from, .. } = &err {
            warn!("{} ⚠️ 任务已变为 {}，租约已丢失，放弃本次结果", ctx, from);
            return RunOutcome::LeaseLost;
        }

        error!("{} 💥 意外错误: {}", ctx, err);

        let count = match (&job.course_id, &job.section_id) {
            (Some(course_id), Some(section_id)) => self
                .store
                .count_questions(course_id, section_id)
                .await
                .unwrap_or_else(|e| {
                    warn!("{} 兜底读取题目数量失败: {}", ctx, e);
                    0
                }),
            _ => 0,
        };

        let decision = step::recover(count, &err.to_string())
            .with_duration(started.elapsed().as_millis() as u64);
        let status = decision.job_update.status;

        match self.store.commit_step(&job.id, decision).await {
            Ok(_) => {}
            Err(BackfillError::InvalidTransition { .. }) => {
                warn!("{} ⚠️ 兜底写入前租约已被回收", ctx);
                return RunOutcome::LeaseLost;
            }
            Err(e) => error!("{} 兜底写入失败: {}", ctx, e),
        }

        RunOutcome::Finished {
            status,
            final_count: count,
        }
    }

    /// 回收租约过期的 RUNNING 任务，返回回收数量
    pub async fn reap_abandoned(&self) -> BackfillResult<usize> {
        let expired = self.store.expired_jobs(chrono::Utc::now()).await?;
        let mut reaped = 0;

        for job in expired {
            let ctx = BackfillCtx::from_job(&job);
            let count = match (&job.course_id, &job.section_id) {
                (Some(course_id), Some(section_id)) => {
                    match self.store.count_questions(course_id, section_id).await {
                        Ok(count) => count,
                        Err(e) => {
                            error!("{} ❌ 读取题目数量失败，下次再回收: {}", ctx, e);
                            continue;
                        }
                    }
                }
                _ => 0,
            };

            let decision = step::abandon(&job, count, &self.policy);
            match self.store.commit_step(&job.id, decision).await {
                Ok(next) => {
                    warn!(
                        "{} ⚠️ 租约过期，已回收{}",
                        ctx,
                        if next.is_some() { "并续跑" } else { "" }
                    );
                    reaped += 1;
                }
                // 原 worker 刚好在此期间完成
                Err(BackfillError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(reaped)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知 panic".to_string());
    format!("处理过程中 panic: {}", detail)
}
