//! 题目生成 - 业务能力层
//!
//! 只负责"调用模型拿到原始题目"能力，不关心去重和落盘
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务

use std::time::Duration;

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::GenerationBlueprint;

/// 生成选项（来自规划器）
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub request_count: u32,
    pub token_budget: u32,
    pub retries: u32,
    pub rate_limit_max_retries: u32,
    pub rate_limit_retry_delay_ms: u64,
    /// 单次调用超时
    pub timeout: Duration,
}

/// 生成结果
#[derive(Debug, Clone, Default)]
pub struct GeneratedBatch {
    /// 原始题目，尚未校验
    pub questions: Vec<JsonValue>,
    pub model: String,
}

/// 生成器
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<GeneratedBatch>;
}

/// 构建出题提示词
///
/// 返回 (system_prompt, user_prompt)，`avoid_stems` 为已有题干，提示模型不要重复
pub fn build_prompts(
    blueprint: &GenerationBlueprint,
    count: u32,
    avoid_stems: &[String],
) -> (String, String) {
    let system_prompt = "You write high-quality multiple-choice study questions. \
                         Respond with JSON only, no prose and no markdown fences."
        .to_string();

    let key_points = if blueprint.key_points.is_empty() {
        "  (none listed)".to_string()
    } else {
        blueprint
            .key_points
            .iter()
            .map(|p| format!("  - {}", p))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let avoid = if avoid_stems.is_empty() {
        "  (none yet)".to_string()
    } else {
        avoid_stems
            .iter()
            .take(MAX_AVOID_STEMS)
            .map(|s| format!("  - {}", s))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let user_prompt = format!(
        r#"Write {count} new multiple-choice questions for the study section below.

Section: {title}
Summary: {summary}
Key points:
{key_points}

Existing questions (do NOT repeat or paraphrase these):
{avoid}

Rules:
- Each question tests a different fact or concept.
- 4 options, exactly one correct.
- Include a short explanation.
- difficulty is one of "easy", "medium", "hard".

Return exactly this JSON shape:
{{"questions": [{{"stem": "...", "options": ["...", "...", "...", "..."], "correctIndex": 0, "explanation": "...", "topicTags": ["..."], "difficulty": "medium"}}]}}"#,
        count = count,
        title = blueprint.title,
        summary = blueprint.summary,
        key_points = key_points,
        avoid = avoid,
    );

    (system_prompt, user_prompt)
}

/// 提示词里最多列出的已有题干
const MAX_AVOID_STEMS: usize = 40;

/// 从模型响应中解析题目数组
///
/// 兼容 ```json 代码块、顶层数组和 `{"questions": [...]}` 三种形式
pub fn parse_questions(content: &str) -> Result<Vec<JsonValue>> {
    let trimmed = strip_code_fence(content.trim());
    let value: JsonValue = serde_json::from_str(trimmed)
        .map_err(|e| anyhow::anyhow!("无法解析模型返回的 JSON: {}", e))?;

    match value {
        JsonValue::Array(items) => Ok(items),
        JsonValue::Object(mut map) => match map.remove("questions") {
            Some(JsonValue::Array(items)) => Ok(items),
            _ => anyhow::bail!("模型返回的 JSON 缺少 questions 数组"),
        },
        _ => anyhow::bail!("模型返回的 JSON 不是对象或数组"),
    }
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// 是否为限流错误
fn is_rate_limited(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit")
}

/// 基于 OpenAI 兼容接口的生成器
pub struct LlmGenerator {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmGenerator {
    /// 创建新的生成器
    pub fn new(config: &Config) -> Result<Self> {
        if config.llm_api_key.is_empty() {
            anyhow::bail!("LLM_API_KEY 未配置");
        }

        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Ok(Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
        })
    }

    /// 单次调用，返回原始文本
    async fn send_to_llm(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        token_budget: u32,
    ) -> Result<String> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_prompt.len());

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt)
            .build()?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_prompt)
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.7)
            .max_tokens(token_budget)
            .build()?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| anyhow::anyhow!("LLM API 调用失败: {}", e))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("LLM 返回内容为空"))?;

        Ok(content)
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<GeneratedBatch> {
        let mut failures = 0u32;
        let mut rate_limited = 0u32;

        loop {
            let call = self.send_to_llm(system_prompt, user_prompt, opts.token_budget);
            let outcome = match tokio::time::timeout(opts.timeout, call).await {
                Ok(result) => result.and_then(|content| parse_questions(&content)),
                Err(_) => Err(anyhow::anyhow!("LLM 调用超时 ({:?})", opts.timeout)),
            };

            let err = match outcome {
                Ok(questions) => {
                    debug!("LLM 返回 {} 道原始题目", questions.len());
                    return Ok(GeneratedBatch {
                        questions,
                        model: self.model_name.clone(),
                    });
                }
                Err(e) => e,
            };

            let message = err.to_string();
            if is_rate_limited(&message) && rate_limited < opts.rate_limit_max_retries {
                rate_limited += 1;
                let delay = opts.rate_limit_retry_delay_ms * rate_limited as u64;
                warn!(
                    "LLM 限流，{} ms 后重试 ({}/{})",
                    delay, rate_limited, opts.rate_limit_max_retries
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                continue;
            }

            if failures < opts.retries {
                failures += 1;
                warn!("LLM 调用失败: {}，重试 ({}/{})", message, failures, opts.retries);
                continue;
            }

            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint() -> GenerationBlueprint {
        GenerationBlueprint {
            title: "Renal physiology".to_string(),
            summary: "Nephron transport".to_string(),
            key_points: vec!["Sodium handling".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_questions_shapes() {
        let wrapped = r#"{"questions": [{"stem": "a"}, {"stem": "b"}]}"#;
        assert_eq!(parse_questions(wrapped).unwrap().len(), 2);

        let bare = r#"[{"stem": "a"}]"#;
        assert_eq!(parse_questions(bare).unwrap().len(), 1);

        let fenced = "```json\n{\"questions\": [{\"stem\": \"a\"}]}\n```";
        assert_eq!(parse_questions(fenced).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_questions_rejects_garbage() {
        assert!(parse_questions("Sure! Here are your questions").is_err());
        assert!(parse_questions(r#"{"items": []}"#).is_err());
        assert!(parse_questions("42").is_err());
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(is_rate_limited("LLM API 调用失败: 429 Too Many Requests"));
        assert!(is_rate_limited("Rate limit reached for requests"));
        assert!(!is_rate_limited("invalid api key"));
    }

    #[test]
    fn test_build_prompts_lists_existing_stems() {
        let stems: Vec<String> = (0..50).map(|i| format!("existing stem {}", i)).collect();
        let (system, user) = build_prompts(&blueprint(), 7, &stems);
        assert!(system.contains("JSON"));
        assert!(user.contains("Write 7 new"));
        assert!(user.contains("Renal physiology"));
        assert!(user.contains("existing stem 0"));
        assert!(user.contains("existing stem 39"));
        assert!(!user.contains("existing stem 40"));
    }

    #[test]
    fn test_new_requires_api_key() {
        assert!(LlmGenerator::new(&Config::default()).is_err());
    }

    /// 测试真实 LLM 出题
    ///
    /// 运行方式：
    /// ```bash
    /// LLM_API_KEY=... cargo test test_live_generation -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_live_generation() {
        let _ = tracing_subscriber::fmt::try_init();

        let generator = LlmGenerator::new(&Config::from_env()).expect("需要 LLM_API_KEY");
        let (system, user) = build_prompts(&blueprint(), 3, &[]);
        let opts = GenerateOptions {
            request_count: 3,
            token_budget: 2000,
            retries: 1,
            rate_limit_max_retries: 2,
            rate_limit_retry_delay_ms: 1000,
            timeout: Duration::from_secs(60),
        };

        let batch = generator.generate(&system, &user, &opts).await.unwrap();
        println!("模型: {}, 题目数: {}", batch.model, batch.questions.len());
        assert!(!batch.questions.is_empty());
    }
}
