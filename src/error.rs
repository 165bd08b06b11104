use thiserror::Error;

/// 回填流水线错误类型
///
/// 注意：`ClaimConflict` 不算真正的错误，调用方应当静默返回
#[derive(Debug, Error)]
pub enum BackfillError {
    /// 任务已被其他 worker 认领（或已不是 PENDING）
    #[error("任务 {job_id} 已被认领")]
    ClaimConflict { job_id: String },

    /// 任务不存在
    #[error("任务不存在: {job_id}")]
    JobNotFound { job_id: String },

    /// 任务参数无效（缺少 ID、章节不存在、章节不属于该课程、缺少出题蓝图）
    #[error("任务参数无效: {0}")]
    InvalidPayload(String),

    /// 出题失败（生成器或规划器报错，或没有可用结果）
    #[error("题目生成失败: {0}")]
    Generation(String),

    /// 存储层错误
    #[error("存储错误: {0}")]
    Store(String),

    /// 任务状态非法迁移（一个任务只能迁移一次）
    #[error("任务 {job_id} 状态非法迁移 (当前: {from})")]
    InvalidTransition { job_id: String, from: String },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

impl BackfillError {
    /// 是否为认领冲突
    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, BackfillError::ClaimConflict { .. })
    }
}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for BackfillError {
    fn from(err: serde_json::Error) -> Self {
        BackfillError::Store(format!("JSON 序列化失败: {}", err))
    }
}

impl From<toml::de::Error> for BackfillError {
    fn from(err: toml::de::Error) -> Self {
        BackfillError::Config(format!("TOML 解析失败: {}", err))
    }
}

impl From<std::io::Error> for BackfillError {
    fn from(err: std::io::Error) -> Self {
        BackfillError::Config(format!("读取文件失败: {}", err))
    }
}

// ========== Result 类型别名 ==========

/// 回填流水线结果类型
pub type BackfillResult<T> = Result<T, BackfillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_conflict_is_not_a_failure() {
        let err = BackfillError::ClaimConflict {
            job_id: "job-1".to_string(),
        };
        assert!(err.is_claim_conflict());
        assert!(!BackfillError::Store("x".into()).is_claim_conflict());
    }

    #[test]
    fn test_display_carries_context() {
        let err = BackfillError::InvalidTransition {
            job_id: "job-9".to_string(),
            from: "COMPLETED".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("job-9"));
        assert!(msg.contains("COMPLETED"));
    }
}
