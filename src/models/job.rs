//! 回填任务记录
//!
//! 每次回填尝试对应一条任务记录，生命周期：
//! PENDING → RUNNING → COMPLETED / FAILED，终态之后不再变化

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BackfillPolicy;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// 是否为终态
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// 回填任务
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillJob {
    pub id: String,
    pub status: JobStatus,
    /// 由外部触发方写入，可能缺失
    pub course_id: Option<String>,
    pub section_id: Option<String>,
    pub target_count: u32,
    pub attempt: u32,
    pub max_attempts: u32,
    pub no_progress_streak: u32,
    pub parent_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 认领后的租约到期时间，过期仍为 RUNNING 视为被遗弃
    pub lease_expires_at: Option<DateTime<Utc>>,

    // --- 结果字段 ---
    pub final_count: Option<u32>,
    pub generated_now: Option<u32>,
    pub skipped_count: Option<u32>,
    pub duplicate_skipped: Option<u32>,
    pub ai_request_count: Option<u32>,
    pub next_job_id: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl BackfillJob {
    /// 由创建请求生成 PENDING 任务
    pub fn from_new(new: NewJob) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            course_id: new.course_id,
            section_id: new.section_id,
            target_count: new.target_count,
            attempt: new.attempt,
            max_attempts: new.max_attempts,
            no_progress_streak: new.no_progress_streak,
            parent_job_id: new.parent_job_id,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            lease_expires_at: None,
            final_count: None,
            generated_now: None,
            skipped_count: None,
            duplicate_skipped: None,
            ai_request_count: None,
            next_job_id: None,
            error: None,
            message: None,
        }
    }

    /// 预算是否已耗尽（在本步开始前检查）
    pub fn budget_exhausted(&self, stall_limit: u32) -> bool {
        self.attempt > self.max_attempts || self.no_progress_streak >= stall_limit
    }
}

/// 任务创建请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub course_id: Option<String>,
    pub section_id: Option<String>,
    pub target_count: u32,
    pub attempt: u32,
    pub max_attempts: u32,
    pub no_progress_streak: u32,
    pub parent_job_id: Option<String>,
}

impl NewJob {
    /// 外部触发的第一条任务
    ///
    /// attempt = 1，noProgressStreak = 0，maxAttempts = clamp(target * 3, 18, 60)
    pub fn initial(
        course_id: impl Into<String>,
        section_id: impl Into<String>,
        target_count: u32,
        policy: &BackfillPolicy,
    ) -> Self {
        let target_count = policy.clamp_target(target_count);
        Self {
            course_id: Some(course_id.into()),
            section_id: Some(section_id.into()),
            target_count,
            attempt: 1,
            max_attempts: policy.max_attempts_for(target_count),
            no_progress_streak: 0,
            parent_job_id: None,
        }
    }

    /// 链式续跑任务：attempt + 1，沿用目标与预算
    pub fn continuation(job: &BackfillJob, no_progress_streak: u32) -> Self {
        Self {
            course_id: job.course_id.clone(),
            section_id: job.section_id.clone(),
            target_count: job.target_count,
            attempt: job.attempt + 1,
            max_attempts: job.max_attempts,
            no_progress_streak,
            parent_job_id: Some(job.id.clone()),
        }
    }
}

/// 任务终态写入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub final_count: u32,
    pub generated_now: u32,
    pub skipped_count: u32,
    pub duplicate_skipped: u32,
    pub ai_request_count: u32,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl JobUpdate {
    /// 未做任何生成的终态
    pub fn idle(status: JobStatus, final_count: u32) -> Self {
        Self {
            status,
            final_count,
            generated_now: 0,
            skipped_count: 0,
            duplicate_skipped: 0,
            ai_request_count: 0,
            error: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_job_defaults() {
        let policy = BackfillPolicy::default();
        let job = NewJob::initial("c1", "s1", 10, &policy);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.max_attempts, 30);
        assert_eq!(job.no_progress_streak, 0);
        assert!(job.parent_job_id.is_none());

        let big = NewJob::initial("c1", "s1", 500, &policy);
        assert_eq!(big.target_count, 30);
        assert_eq!(big.max_attempts, 60);
    }

    #[test]
    fn test_continuation_links_chain() {
        let policy = BackfillPolicy::default();
        let job = BackfillJob::from_new(NewJob::initial("c1", "s1", 5, &policy));
        let next = NewJob::continuation(&job, 2);
        assert_eq!(next.attempt, 2);
        assert_eq!(next.no_progress_streak, 2);
        assert_eq!(next.max_attempts, job.max_attempts);
        assert_eq!(next.parent_job_id.as_deref(), Some(job.id.as_str()));
    }

    #[test]
    fn test_budget_exhausted() {
        let policy = BackfillPolicy::default();
        let mut job = BackfillJob::from_new(NewJob::initial("c1", "s1", 5, &policy));
        assert!(!job.budget_exhausted(4));
        job.no_progress_streak = 4;
        assert!(job.budget_exhausted(4));
        job.no_progress_streak = 0;
        job.attempt = job.max_attempts + 1;
        assert!(job.budget_exhausted(4));
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_string(&JobStatus::Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }
}
