//! 章节聚合
//!
//! 章节归内容系统所有，回填流水线只读写其中的出题相关字段

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 章节出题状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionsStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Failed,
}

impl QuestionsStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QuestionsStatus::Completed | QuestionsStatus::Failed)
    }
}

/// 出题蓝图
///
/// 由上游文档解析生成，没有蓝图的章节不能出题
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationBlueprint {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    #[serde(default)]
    pub source_file_id: Option<String>,
    #[serde(default)]
    pub source_label: Option<String>,
}

/// 章节
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub course_id: String,
    #[serde(default)]
    pub blueprint: Option<GenerationBlueprint>,
    #[serde(default)]
    pub questions_status: QuestionsStatus,
    #[serde(default)]
    pub questions_count: u32,
    /// 规划器的统计数据，对本模块不透明
    #[serde(default)]
    pub question_gen_stats: JsonValue,
    /// 仅作提示，不做事务保证
    #[serde(default)]
    pub active_question_job_id: Option<String>,
    #[serde(default)]
    pub questions_error_message: Option<String>,
    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_questions_duration_ms: Option<u64>,
}

impl Section {
    /// 创建一个尚未出题的章节
    pub fn new(
        course_id: impl Into<String>,
        id: impl Into<String>,
        blueprint: Option<GenerationBlueprint>,
    ) -> Self {
        Self {
            id: id.into(),
            course_id: course_id.into(),
            blueprint,
            questions_status: QuestionsStatus::Pending,
            questions_count: 0,
            question_gen_stats: JsonValue::Null,
            active_question_job_id: None,
            questions_error_message: None,
            last_error_at: None,
            last_questions_duration_ms: None,
        }
    }
}

/// 章节写入
///
/// `error_message` 为 None 时清空上次错误；活跃任务指针由存储层根据是否续跑决定
#[derive(Debug, Clone, PartialEq)]
pub struct SectionUpdate {
    pub status: QuestionsStatus,
    pub questions_count: u32,
    pub gen_stats: Option<JsonValue>,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
}

impl SectionUpdate {
    pub fn new(status: QuestionsStatus, questions_count: u32) -> Self {
        Self {
            status,
            questions_count,
            gen_stats: None,
            error_message: None,
            duration_ms: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_stats(mut self, stats: Option<JsonValue>) -> Self {
        self.gen_stats = stats;
        self
    }
}
