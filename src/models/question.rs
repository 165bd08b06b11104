use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 难度档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// 宽松解析，未知取值返回 None
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" | "low" => Some(Difficulty::Easy),
            "medium" | "moderate" | "mid" => Some(Difficulty::Medium),
            "hard" | "high" | "difficult" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

/// 题目来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub file_id: Option<String>,
    pub section_id: String,
    pub label: Option<String>,
}

/// 持久化的选择题
///
/// 去重时以规范化后的题干为准，而不是记录 ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub stem: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub source_ref: SourceRef,
    pub course_id: String,
    pub section_id: String,
    pub created_at: DateTime<Utc>,
}

/// 规范化题目时附加的默认元数据
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuestionDefaults {
    pub course_id: String,
    pub section_id: String,
    pub topic_tags: Vec<String>,
    pub source_file_id: Option<String>,
    pub source_label: Option<String>,
}
