//! 题目规范化 - 业务能力层
//!
//! 把生成器返回的原始 JSON 转成 `Question`，缺少题干或选项时返回 None

use chrono::Utc;
use serde_json::Value as JsonValue;

use crate::models::{Difficulty, Question, QuestionDefaults, SourceRef};

/// 最少选项数
const MIN_OPTIONS: usize = 2;

/// 规范化一道原始题目
pub fn normalize(raw: &JsonValue, defaults: &QuestionDefaults) -> Option<Question> {
    let stem = first_str(raw, &["stem", "question", "prompt"])?
        .trim()
        .to_string();
    if stem.is_empty() {
        return None;
    }

    let options: Vec<String> = first_field(raw, &["options", "choices", "answers"])?
        .as_array()?
        .iter()
        .filter_map(option_text)
        .collect();
    if options.len() < MIN_OPTIONS {
        return None;
    }

    let correct_index = first_field(raw, &["correctIndex", "correct_index", "answerIndex"])
        .and_then(JsonValue::as_u64)? as usize;
    if correct_index >= options.len() {
        return None;
    }

    let explanation = first_str(raw, &["explanation", "rationale"])
        .unwrap_or_default()
        .trim()
        .to_string();

    let topic_tags = first_field(raw, &["topicTags", "topic_tags", "tags"])
        .and_then(JsonValue::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(JsonValue::as_str)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|tags| !tags.is_empty())
        .unwrap_or_else(|| defaults.topic_tags.clone());

    let difficulty = first_str(raw, &["difficulty"])
        .and_then(Difficulty::parse)
        .unwrap_or_default();

    Some(Question {
        stem,
        options,
        correct_index,
        explanation,
        topic_tags,
        difficulty,
        source_ref: SourceRef {
            file_id: defaults.source_file_id.clone(),
            section_id: defaults.section_id.clone(),
            label: defaults.source_label.clone(),
        },
        course_id: defaults.course_id.clone(),
        section_id: defaults.section_id.clone(),
        created_at: Utc::now(),
    })
}

fn first_field<'a>(raw: &'a JsonValue, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter().find_map(|k| raw.get(*k)).filter(|v| !v.is_null())
}

fn first_str<'a>(raw: &'a JsonValue, keys: &[&str]) -> Option<&'a str> {
    first_field(raw, keys).and_then(JsonValue::as_str)
}

/// 选项可以是字符串，也可以是 `{ "text": ... }`
fn option_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::String(s) => s.as_str(),
        JsonValue::Object(_) => value.get("text").and_then(JsonValue::as_str)?,
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defaults() -> QuestionDefaults {
        QuestionDefaults {
            course_id: "c1".to_string(),
            section_id: "s1".to_string(),
            topic_tags: vec!["renal".to_string()],
            source_file_id: Some("file-1".to_string()),
            source_label: Some("Chapter 2".to_string()),
        }
    }

    #[test]
    fn test_normalize_full_question() {
        let raw = json!({
            "stem": "  Where is most sodium reabsorbed?  ",
            "options": ["Proximal tubule", "Loop of Henle", {"text": "Collecting duct"}],
            "correctIndex": 0,
            "explanation": "About 65% in the PCT.",
            "topicTags": ["nephron"],
            "difficulty": "HARD"
        });
        let q = normalize(&raw, &defaults()).unwrap();
        assert_eq!(q.stem, "Where is most sodium reabsorbed?");
        assert_eq!(q.options.len(), 3);
        assert_eq!(q.options[2], "Collecting duct");
        assert_eq!(q.topic_tags, vec!["nephron"]);
        assert_eq!(q.difficulty, Difficulty::Hard);
        assert_eq!(q.source_ref.label.as_deref(), Some("Chapter 2"));
        assert_eq!(q.section_id, "s1");
    }

    #[test]
    fn test_normalize_applies_defaults_and_aliases() {
        let raw = json!({
            "question": "Define osmosis",
            "choices": ["a", "b"],
            "answerIndex": 1
        });
        let q = normalize(&raw, &defaults()).unwrap();
        assert_eq!(q.correct_index, 1);
        assert_eq!(q.topic_tags, vec!["renal"]);
        assert_eq!(q.difficulty, Difficulty::Medium);
        assert!(q.explanation.is_empty());
    }

    #[test]
    fn test_normalize_rejects_invalid() {
        let d = defaults();
        assert!(normalize(&json!({"options": ["a", "b"], "correctIndex": 0}), &d).is_none());
        assert!(normalize(&json!({"stem": "  ", "options": ["a", "b"], "correctIndex": 0}), &d).is_none());
        assert!(normalize(&json!({"stem": "x", "options": ["a"], "correctIndex": 0}), &d).is_none());
        assert!(normalize(&json!({"stem": "x", "options": ["a", "b"], "correctIndex": 2}), &d).is_none());
        assert!(normalize(&json!({"stem": "x", "options": ["a", "b"]}), &d).is_none());
        assert!(normalize(&json!("not an object"), &d).is_none());
    }
}
