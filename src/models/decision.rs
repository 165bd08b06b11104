use crate::models::job::{JobUpdate, NewJob};
use crate::models::section::SectionUpdate;

/// 一步的决策结果
///
/// 由纯函数计算，存储层在同一把锁内整体落盘：
/// 结束当前任务、按需创建续跑任务、更新章节
#[derive(Debug, Clone, PartialEq)]
pub struct StepDecision {
    pub job_update: JobUpdate,
    /// 章节不可用（不存在或不属于该课程）时为 None
    pub section_update: Option<SectionUpdate>,
    pub next_job: Option<NewJob>,
}

impl StepDecision {
    /// 是否为终态（没有续跑）
    pub fn is_terminal(&self) -> bool {
        self.next_job.is_none()
    }

    /// 记录本步耗时
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        if let Some(section) = self.section_update.as_mut() {
            section.duration_ms = Some(duration_ms);
        }
        self
    }
}
