use std::path::Path;

use serde::Deserialize;

use crate::error::{BackfillError, BackfillResult};

/// 回填策略参数
///
/// 单步增量上限、停滞阈值、去重阈值等，默认值即生产环境取值
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackfillPolicy {
    /// 每次快照采样的已有题目上限
    pub sample_limit: usize,
    /// 单步最多推进的题目数量
    pub step_increment: u32,
    /// 连续无进展多少次视为停滞
    pub stall_limit: u32,
    /// 近似重复阈值
    pub dedup_threshold: f64,
    /// 目标题目数上限
    pub max_target: u32,
    /// 最大尝试次数下限
    pub min_attempts: u32,
    /// 最大尝试次数上限
    pub max_attempts_cap: u32,
    /// 每道目标题目对应的尝试次数
    pub attempts_per_target: u32,
}

impl Default for BackfillPolicy {
    fn default() -> Self {
        Self {
            sample_limit: 120,
            step_increment: 30,
            stall_limit: 4,
            dedup_threshold: 0.7,
            max_target: 30,
            min_attempts: 18,
            max_attempts_cap: 60,
            attempts_per_target: 3,
        }
    }
}

impl BackfillPolicy {
    /// 目标题目数限制在 [1, max_target]
    pub fn clamp_target(&self, target: u32) -> u32 {
        target.clamp(1, self.max_target)
    }

    /// maxAttempts = clamp(target * 3, 18, 60)
    pub fn max_attempts_for(&self, target: u32) -> u32 {
        target
            .saturating_mul(self.attempts_per_target)
            .clamp(self.min_attempts, self.max_attempts_cap)
    }
}

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 同时运行的任务数量
    pub max_concurrent_jobs: usize,
    /// 章节种子 TOML 文件目录
    pub seed_folder: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 默认日志过滤（RUST_LOG 优先）
    pub log_filter: String,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 单次生成调用的超时时间
    pub generation_timeout_ms: u64,
    // --- 任务租约 ---
    pub lease_ms: u64,
    /// 生成调用必须在租约到期前这么久结束
    pub lease_margin_ms: u64,
    pub sweep_interval_ms: u64,
    // --- 规划器默认值 ---
    pub planner_retries: u32,
    pub rate_limit_max_retries: u32,
    pub rate_limit_retry_delay_ms: u64,
    pub tokens_per_question: u32,
    pub max_token_budget: u32,
    /// 回填策略
    pub policy: BackfillPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 8,
            seed_folder: "sections".to_string(),
            verbose_logging: false,
            log_filter: "info".to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            generation_timeout_ms: 120_000,
            lease_ms: 540_000,
            lease_margin_ms: 30_000,
            sweep_interval_ms: 30_000,
            planner_retries: 2,
            rate_limit_max_retries: 3,
            rate_limit_retry_delay_ms: 2_000,
            tokens_per_question: 350,
            max_token_budget: 12_000,
            policy: BackfillPolicy::default(),
        }
    }
}

impl Config {
    /// 按 `BACKFILL_CONFIG` 指定的文件加载（可选），再用环境变量覆盖
    pub fn load() -> BackfillResult<Self> {
        let base = match std::env::var("BACKFILL_CONFIG") {
            Ok(path) => Self::from_toml_file(path)?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    /// 只从环境变量读取
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载，缺省字段使用默认值
    pub fn from_toml_file(path: impl AsRef<Path>) -> BackfillResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BackfillError::Config(format!("无法读取配置文件 {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn with_env_overrides(self) -> Self {
        let default = self;
        Self {
            max_concurrent_jobs: std::env::var("MAX_CONCURRENT_JOBS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_concurrent_jobs),
            seed_folder: std::env::var("SEED_FOLDER").unwrap_or(default.seed_folder),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            log_filter: std::env::var("LOG_FILTER").unwrap_or(default.log_filter),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            generation_timeout_ms: std::env::var("GENERATION_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.generation_timeout_ms),
            lease_ms: std::env::var("JOB_LEASE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.lease_ms),
            lease_margin_ms: std::env::var("JOB_LEASE_MARGIN_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.lease_margin_ms),
            sweep_interval_ms: std::env::var("SWEEP_INTERVAL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.sweep_interval_ms),
            planner_retries: std::env::var("PLANNER_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.planner_retries),
            rate_limit_max_retries: std::env::var("RATE_LIMIT_MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.rate_limit_max_retries),
            rate_limit_retry_delay_ms: std::env::var("RATE_LIMIT_RETRY_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.rate_limit_retry_delay_ms),
            tokens_per_question: std::env::var("TOKENS_PER_QUESTION").ok().and_then(|v| v.parse().ok()).unwrap_or(default.tokens_per_question),
            max_token_budget: std::env::var("MAX_TOKEN_BUDGET").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_token_budget),
            policy: default.policy,
        }
    }
}
