//! 请求规划 - 业务能力层
//!
//! 决定本步向生成器请求多少道题、给多少 token、怎么重试；
//! 批次结束后把统计数据回写到章节（对流程不透明的 JSON）

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::config::Config;

/// 请求计划
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPlan {
    /// 无需调用生成器（视为无进展，但不是错误）
    pub skip_ai: bool,
    pub ai_request_count: u32,
    pub token_budget: u32,
    pub retries: u32,
    pub rate_limit_max_retries: u32,
    pub rate_limit_retry_delay_ms: u64,
    pub predicted_yield: f64,
    pub estimated_savings_percent: f64,
}

/// 一个批次的观测数据
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSample {
    pub ai_request_count: u32,
    pub valid_produced: u32,
    pub duplicate_skipped: u32,
    pub latency_ms: u64,
    pub token_budget: u32,
}

/// 规划器
pub trait Planner: Send + Sync {
    /// `requested`：本步希望新增的数量；`existing`：已有数量
    fn plan(&self, requested: u32, existing: u32, stats: &JsonValue) -> RequestPlan;

    /// 用本批次的观测数据更新统计
    fn update_stats(&self, prev: &JsonValue, sample: &BatchSample) -> JsonValue;
}

/// 章节出题统计（以 JSON 形式保存在章节上）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldStats {
    pub batches: u32,
    /// 有效产出 / 请求数 的指数滑动平均
    pub ema_yield: f64,
    pub ema_duplicate_rate: f64,
    pub avg_latency_ms: f64,
    pub total_requested: u64,
    pub total_valid: u64,
}

impl Default for YieldStats {
    fn default() -> Self {
        Self {
            batches: 0,
            ema_yield: DEFAULT_YIELD,
            ema_duplicate_rate: 0.0,
            avg_latency_ms: 0.0,
            total_requested: 0,
            total_valid: 0,
        }
    }
}

impl YieldStats {
    /// 解析失败或为空时使用默认值
    pub fn from_json(value: &JsonValue) -> Self {
        if value.is_null() {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

const DEFAULT_YIELD: f64 = 0.75;
const MIN_YIELD: f64 = 0.25;
const EMA_ALPHA: f64 = 0.3;

/// 基于历史产出率的默认规划器
#[derive(Debug, Clone)]
pub struct YieldPlanner {
    retries: u32,
    rate_limit_max_retries: u32,
    rate_limit_retry_delay_ms: u64,
    tokens_per_question: u32,
    max_token_budget: u32,
}

impl YieldPlanner {
    pub fn new(config: &Config) -> Self {
        Self {
            retries: config.planner_retries,
            rate_limit_max_retries: config.rate_limit_max_retries,
            rate_limit_retry_delay_ms: config.rate_limit_retry_delay_ms,
            tokens_per_question: config.tokens_per_question,
            max_token_budget: config.max_token_budget,
        }
    }
}

impl Planner for YieldPlanner {
    fn plan(&self, requested: u32, existing: u32, stats: &JsonValue) -> RequestPlan {
        let stats = YieldStats::from_json(stats);
        let predicted_yield = stats.ema_yield.clamp(MIN_YIELD, 1.0);

        if requested == 0 {
            return RequestPlan {
                skip_ai: true,
                ai_request_count: 0,
                token_budget: 0,
                retries: 0,
                rate_limit_max_retries: 0,
                rate_limit_retry_delay_ms: 0,
                predicted_yield,
                estimated_savings_percent: 100.0,
            };
        }

        let naive = requested * 2;
        let ai_request_count = ((requested as f64 / predicted_yield).ceil() as u32)
            .clamp(requested, naive);
        let token_budget = self
            .tokens_per_question
            .saturating_mul(ai_request_count)
            .min(self.max_token_budget);
        let estimated_savings_percent =
            (1.0 - ai_request_count as f64 / naive as f64) * 100.0;

        debug!(
            "规划: 需要 {} 道 (已有 {}), 预测产出率 {:.2}, 请求 {} 道, token {}",
            requested, existing, predicted_yield, ai_request_count, token_budget
        );

        RequestPlan {
            skip_ai: false,
            ai_request_count,
            token_budget,
            retries: self.retries,
            rate_limit_max_retries: self.rate_limit_max_retries,
            rate_limit_retry_delay_ms: self.rate_limit_retry_delay_ms,
            predicted_yield,
            estimated_savings_percent,
        }
    }

    fn update_stats(&self, prev: &JsonValue, sample: &BatchSample) -> JsonValue {
        let mut stats = YieldStats::from_json(prev);
        let requested = sample.ai_request_count.max(1) as f64;
        let batch_yield = (sample.valid_produced as f64 / requested).min(1.0);
        let duplicate_rate = (sample.duplicate_skipped as f64 / requested).min(1.0);

        if stats.batches == 0 {
            stats.ema_yield = batch_yield;
            stats.ema_duplicate_rate = duplicate_rate;
            stats.avg_latency_ms = sample.latency_ms as f64;
        } else {
            stats.ema_yield = EMA_ALPHA * batch_yield + (1.0 - EMA_ALPHA) * stats.ema_yield;
            stats.ema_duplicate_rate =
                EMA_ALPHA * duplicate_rate + (1.0 - EMA_ALPHA) * stats.ema_duplicate_rate;
            stats.avg_latency_ms = (stats.avg_latency_ms * stats.batches as f64
                + sample.latency_ms as f64)
                / (stats.batches + 1) as f64;
        }
        stats.batches += 1;
        stats.total_requested += sample.ai_request_count as u64;
        stats.total_valid += sample.valid_produced as u64;

        serde_json::to_value(&stats).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> YieldPlanner {
        YieldPlanner::new(&Config::default())
    }

    #[test]
    fn test_skip_when_nothing_requested() {
        let plan = planner().plan(0, 30, &JsonValue::Null);
        assert!(plan.skip_ai);
        assert_eq!(plan.ai_request_count, 0);
    }

    #[test]
    fn test_first_plan_uses_default_yield() {
        let plan = planner().plan(10, 0, &JsonValue::Null);
        assert!(!plan.skip_ai);
        // ceil(10 / 0.75) = 14
        assert_eq!(plan.ai_request_count, 14);
        assert_eq!(plan.token_budget, 14 * 350);
        assert!(plan.estimated_savings_percent > 0.0);
    }

    #[test]
    fn test_request_count_is_bounded() {
        let stats = serde_json::to_value(YieldStats {
            ema_yield: 0.01,
            batches: 3,
            ..Default::default()
        })
        .unwrap();
        let plan = planner().plan(10, 0, &stats);
        assert_eq!(plan.ai_request_count, 20);
        assert!(plan.token_budget <= Config::default().max_token_budget);
    }

    #[test]
    fn test_update_stats_round_trip() {
        let p = planner();
        let first = p.update_stats(
            &JsonValue::Null,
            &BatchSample {
                ai_request_count: 10,
                valid_produced: 5,
                duplicate_skipped: 2,
                latency_ms: 1000,
                token_budget: 3500,
            },
        );
        let stats = YieldStats::from_json(&first);
        assert_eq!(stats.batches, 1);
        assert!((stats.ema_yield - 0.5).abs() < 1e-9);

        let second = p.update_stats(
            &first,
            &BatchSample {
                ai_request_count: 10,
                valid_produced: 10,
                duplicate_skipped: 0,
                latency_ms: 3000,
                token_budget: 3500,
            },
        );
        let stats = YieldStats::from_json(&second);
        assert_eq!(stats.batches, 2);
        assert!((stats.ema_yield - 0.65).abs() < 1e-9);
        assert!((stats.avg_latency_ms - 2000.0).abs() < 1e-9);
        assert_eq!(stats.total_valid, 15);
    }

    #[test]
    fn test_garbage_stats_fall_back_to_default() {
        let stats = YieldStats::from_json(&serde_json::json!({"unexpected": true}));
        assert_eq!(stats, YieldStats::default());
    }
}
