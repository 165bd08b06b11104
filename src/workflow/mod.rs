//! 流程层（Workflow Layer）
//!
//! ## 职责
//!
//! 定义"一条回填任务"的完整处理流程：
//! 认领 → 校验 → 快照 → 规划 → 生成 → 落盘 → 决策 → 提交
//!
//! - `step`：纯决策函数，不做任何 I/O
//! - `backfill_flow`：把决策函数和各项能力串起来
//! - `backfill_ctx`：日志上下文

pub mod backfill_ctx;
pub mod backfill_flow;
pub mod step;

pub use backfill_ctx::BackfillCtx;
pub use backfill_flow::{BackfillFlow, RunOutcome};
pub use step::BatchResult;
