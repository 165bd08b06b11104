//! 任务 / 章节 / 题目存储 - 基础设施层
//!
//! 唯一的 I/O 接缝，只暴露能力：
//! - 认领任务（读-校验-写在同一把锁内，即 CAS）
//! - 读取章节与已有题目
//! - 原子批量写题目
//! - 原子提交一步的决策（结束任务 + 续跑任务 + 更新章节）
//!
//! 不认识出题流程，不做任何业务判断

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::{BackfillError, BackfillResult};
use crate::models::{
    BackfillJob, JobStatus, NewJob, Question, QuestionsStatus, Section, StepDecision,
};

/// 单个原子批次的最大写入数量
pub const MAX_BATCH_WRITES: usize = 500;

/// 任务创建通知：新任务的 ID
pub type JobTrigger = mpsc::UnboundedSender<String>;

/// 初始任务入队结果
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// 已创建新任务
    Created(BackfillJob),
    /// 章节已有进行中的任务链，未创建
    AlreadyActive { job_id: String },
}

/// 存储能力
#[async_trait]
pub trait BackfillStore: Send + Sync {
    /// 外部触发：仅当章节没有进行中的任务时才创建第一条任务
    async fn enqueue_backfill(&self, new: NewJob) -> BackfillResult<EnqueueOutcome>;

    /// 无条件创建任务
    async fn create_job(&self, new: NewJob) -> BackfillResult<BackfillJob>;

    async fn get_job(&self, job_id: &str) -> BackfillResult<Option<BackfillJob>>;

    async fn list_jobs(&self) -> BackfillResult<Vec<BackfillJob>>;

    /// 认领任务：PENDING → RUNNING，并写入租约
    ///
    /// 任务不是 PENDING 时返回 `ClaimConflict`
    async fn claim_job(&self, job_id: &str, lease: Duration) -> BackfillResult<BackfillJob>;

    async fn get_section(&self, course_id: &str, section_id: &str)
        -> BackfillResult<Option<Section>>;

    async fn upsert_section(&self, section: Section) -> BackfillResult<()>;

    async fn count_questions(&self, course_id: &str, section_id: &str) -> BackfillResult<u32>;

    /// 最近写入的最多 `limit` 条题干
    async fn sample_stems(
        &self,
        course_id: &str,
        section_id: &str,
        limit: usize,
    ) -> BackfillResult<Vec<String>>;

    async fn list_questions(&self, course_id: &str, section_id: &str)
        -> BackfillResult<Vec<Question>>;

    /// 原子写入一批题目，超过 `MAX_BATCH_WRITES` 直接拒绝
    async fn insert_questions(
        &self,
        course_id: &str,
        section_id: &str,
        questions: Vec<Question>,
    ) -> BackfillResult<usize>;

    /// 以任务身份写入一批题目
    ///
    /// 写入与"任务仍为 RUNNING"的检查在同一个原子操作内完成；
    /// 任务已被回收或已结束时返回 `InvalidTransition`，不写入任何题目
    async fn insert_job_questions(
        &self,
        job_id: &str,
        course_id: &str,
        section_id: &str,
        questions: Vec<Question>,
    ) -> BackfillResult<usize>;

    /// 原子提交一步的决策，返回创建的续跑任务
    ///
    /// 任务必须处于 RUNNING，否则返回 `InvalidTransition`
    async fn commit_step(
        &self,
        job_id: &str,
        decision: StepDecision,
    ) -> BackfillResult<Option<BackfillJob>>;

    /// 租约已过期但仍为 RUNNING 的任务
    async fn expired_jobs(&self, now: DateTime<Utc>) -> BackfillResult<Vec<BackfillJob>>;
}

type SectionKey = (String, String);

#[derive(Default)]
struct StoreState {
    jobs: HashMap<String, BackfillJob>,
    sections: HashMap<SectionKey, Section>,
    questions: HashMap<SectionKey, Vec<Question>>,
}

/// 内存存储
///
/// 所有写操作都在同一把锁内完成，新任务的 ID 在释放锁之后发布
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    trigger: Option<JobTrigger>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带任务触发通道的存储
    pub fn with_trigger(trigger: JobTrigger) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            trigger: Some(trigger),
        }
    }

    fn notify(&self, job_id: &str) {
        if let Some(trigger) = &self.trigger {
            if trigger.send(job_id.to_string()).is_err() {
                warn!("任务触发通道已关闭，任务 {} 不会被调度", job_id);
            }
        }
    }
}

fn key(course_id: &str, section_id: &str) -> SectionKey {
    (course_id.to_string(), section_id.to_string())
}

fn check_batch_size(questions: &[Question]) -> BackfillResult<()> {
    if questions.len() > MAX_BATCH_WRITES {
        return Err(BackfillError::Store(format!(
            "批量写入 {} 条超过上限 {}",
            questions.len(),
            MAX_BATCH_WRITES
        )));
    }
    Ok(())
}

fn append_questions(
    state: &mut StoreState,
    course_id: &str,
    section_id: &str,
    questions: Vec<Question>,
) -> usize {
    let written = questions.len();
    state
        .questions
        .entry(key(course_id, section_id))
        .or_default()
        .extend(questions);
    written
}

#[async_trait]
impl BackfillStore for MemoryStore {
    async fn enqueue_backfill(&self, new: NewJob) -> BackfillResult<EnqueueOutcome> {
        let job = {
            let mut state = self.state.lock().await;
            let section_key = match (&new.course_id, &new.section_id) {
                (Some(c), Some(s)) => Some(key(c, s)),
                _ => None,
            };

            if let Some(section) = section_key.as_ref().and_then(|k| state.sections.get(k)) {
                if let Some(active_id) = &section.active_question_job_id {
                    let live = state
                        .jobs
                        .get(active_id)
                        .map(|j| !j.status.is_terminal())
                        .unwrap_or(false);
                    if live {
                        return Ok(EnqueueOutcome::AlreadyActive {
                            job_id: active_id.clone(),
                        });
                    }
                }
            }

            let job = BackfillJob::from_new(new);
            if let Some(section) = section_key.as_ref().and_then(|k| state.sections.get_mut(k)) {
                section.active_question_job_id = Some(job.id.clone());
                section.questions_status = QuestionsStatus::Pending;
                section.questions_error_message = None;
            }
            state.jobs.insert(job.id.clone(), job.clone());
            job
        };

        self.notify(&job.id);
        Ok(EnqueueOutcome::Created(job))
    }

    async fn create_job(&self, new: NewJob) -> BackfillResult<BackfillJob> {
        let job = BackfillJob::from_new(new);
        self.state
            .lock()
            .await
            .jobs
            .insert(job.id.clone(), job.clone());
        self.notify(&job.id);
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> BackfillResult<Option<BackfillJob>> {
        Ok(self.state.lock().await.jobs.get(job_id).cloned())
    }

    async fn list_jobs(&self) -> BackfillResult<Vec<BackfillJob>> {
        let mut jobs: Vec<BackfillJob> = self.state.lock().await.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn claim_job(&self, job_id: &str, lease: Duration) -> BackfillResult<BackfillJob> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| BackfillError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

        if job.status != JobStatus::Pending {
            return Err(BackfillError::ClaimConflict {
                job_id: job_id.to_string(),
            });
        }

        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| BackfillError::Store(format!("租约时长无效: {}", e)))?;
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.lease_expires_at = Some(now + lease);
        debug!("任务 {} 已认领", job_id);
        Ok(job.clone())
    }

    async fn get_section(
        &self,
        course_id: &str,
        section_id: &str,
    ) -> BackfillResult<Option<Section>> {
        // 章节 ID 全局唯一，课程归属由调用方校验
        let state = self.state.lock().await;
        if let Some(section) = state.sections.get(&key(course_id, section_id)) {
            return Ok(Some(section.clone()));
        }
        Ok(state
            .sections
            .values()
            .find(|s| s.id == section_id)
            .cloned())
    }

    async fn upsert_section(&self, section: Section) -> BackfillResult<()> {
        self.state
            .lock()
            .await
            .sections
            .insert(key(&section.course_id, &section.id), section);
        Ok(())
    }

    async fn count_questions(&self, course_id: &str, section_id: &str) -> BackfillResult<u32> {
        let state = self.state.lock().await;
        let count = state
            .questions
            .get(&key(course_id, section_id))
            .map(Vec::len)
            .unwrap_or(0);
        Ok(count as u32)
    }

    async fn sample_stems(
        &self,
        course_id: &str,
        section_id: &str,
        limit: usize,
    ) -> BackfillResult<Vec<String>> {
        let state = self.state.lock().await;
        let stems = state
            .questions
            .get(&key(course_id, section_id))
            .map(|qs| {
                qs.iter()
                    .rev()
                    .take(limit)
                    .map(|q| q.stem.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(stems)
    }

    async fn list_questions(
        &self,
        course_id: &str,
        section_id: &str,
    ) -> BackfillResult<Vec<Question>> {
        let state = self.state.lock().await;
        Ok(state
            .questions
            .get(&key(course_id, section_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_questions(
        &self,
        course_id: &str,
        section_id: &str,
        questions: Vec<Question>,
    ) -> BackfillResult<usize> {
        check_batch_size(&questions)?;
        let mut state = self.state.lock().await;
        Ok(append_questions(&mut state, course_id, section_id, questions))
    }

    async fn insert_job_questions(
        &self,
        job_id: &str,
        course_id: &str,
        section_id: &str,
        questions: Vec<Question>,
    ) -> BackfillResult<usize> {
        check_batch_size(&questions)?;
        let mut state = self.state.lock().await;
        let status = state
            .jobs
            .get(job_id)
            .map(|j| j.status)
            .ok_or_else(|| BackfillError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        if status != JobStatus::Running {
            warn!("任务 {} 已是 {}，拒绝写入 {} 道题目", job_id, status, questions.len());
            return Err(BackfillError::InvalidTransition {
                job_id: job_id.to_string(),
                from: status.to_string(),
            });
        }
        Ok(append_questions(&mut state, course_id, section_id, questions))
    }

    async fn commit_step(
        &self,
        job_id: &str,
        decision: StepDecision,
    ) -> BackfillResult<Option<BackfillJob>> {
        let next = {
            let mut state = self.state.lock().await;
            let job = state
                .jobs
                .get(job_id)
                .cloned()
                .ok_or_else(|| BackfillError::JobNotFound {
                    job_id: job_id.to_string(),
                })?;

            if job.status != JobStatus::Running {
                return Err(BackfillError::InvalidTransition {
                    job_id: job_id.to_string(),
                    from: job.status.to_string(),
                });
            }

            let next = decision.next_job.map(BackfillJob::from_new);
            if let Some(next) = &next {
                state.jobs.insert(next.id.clone(), next.clone());
            }

            let now = Utc::now();
            let update = decision.job_update;
            if let Some(stored) = state.jobs.get_mut(job_id) {
                stored.status = update.status;
                stored.finished_at = Some(now);
                stored.lease_expires_at = None;
                stored.final_count = Some(update.final_count);
                stored.generated_now = Some(update.generated_now);
                stored.skipped_count = Some(update.skipped_count);
                stored.duplicate_skipped = Some(update.duplicate_skipped);
                stored.ai_request_count = Some(update.ai_request_count);
                stored.next_job_id = next.as_ref().map(|n| n.id.clone());
                stored.error = update.error;
                stored.message = update.message;
            }

            if let (Some(section_update), Some(course_id), Some(section_id)) =
                (decision.section_update, &job.course_id, &job.section_id)
            {
                if let Some(section) = state.sections.get_mut(&key(course_id, section_id)) {
                    section.questions_status = section_update.status;
                    section.questions_count =
                        section.questions_count.max(section_update.questions_count);
                    if let Some(stats) = section_update.gen_stats {
                        section.question_gen_stats = stats;
                    }
                    match section_update.error_message {
                        Some(message) => {
                            section.questions_error_message = Some(message);
                            section.last_error_at = Some(now);
                        }
                        None => section.questions_error_message = None,
                    }
                    if let Some(duration_ms) = section_update.duration_ms {
                        section.last_questions_duration_ms = Some(duration_ms);
                    }
                    match &next {
                        Some(next) => section.active_question_job_id = Some(next.id.clone()),
                        None => {
                            if section.active_question_job_id.as_deref() == Some(job_id) {
                                section.active_question_job_id = None;
                            }
                        }
                    }
                }
            }

            next
        };

        if let Some(next) = &next {
            self.notify(&next.id);
        }
        Ok(next)
    }

    async fn expired_jobs(&self, now: DateTime<Utc>) -> BackfillResult<Vec<BackfillJob>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .filter(|j| j.lease_expires_at.map(|t| t <= now).unwrap_or(false))
            .cloned()
            .collect())
    }
}
