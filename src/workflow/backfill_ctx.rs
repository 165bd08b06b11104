//! 回填上下文
//!
//! 封装"我正在处理哪个章节的第几次尝试"这一信息，主要用于日志前缀

use std::fmt::Display;

use crate::models::BackfillJob;

/// 回填上下文
#[derive(Debug, Clone)]
pub struct BackfillCtx {
    pub job_id: String,
    pub course_id: String,
    pub section_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
}

impl BackfillCtx {
    /// 从任务记录创建上下文，缺失的 ID 以 "?" 显示
    pub fn from_job(job: &BackfillJob) -> Self {
        Self {
            job_id: job.id.clone(),
            course_id: job.course_id.clone().unwrap_or_else(|| "?".to_string()),
            section_id: job.section_id.clone().unwrap_or_else(|| "?".to_string()),
            attempt: job.attempt,
            max_attempts: job.max_attempts,
        }
    }
}

impl Display for BackfillCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short_id: String = self.job_id.chars().take(8).collect();
        write!(
            f,
            "[任务 #{} 章节 #{} 第 {}/{} 次]",
            short_id, self.section_id, self.attempt, self.max_attempts
        )
    }
}
