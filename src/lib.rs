//! # Question Backfill
//!
//! 按章节自动补齐练习题的后台回填流水线
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有唯一的存储，只暴露能力
//! - `BackfillStore` - 认领 / 读快照 / 批量写 / 原子提交
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `Deduplicator` - 题干近似重复判断
//! - `Planner` - 根据历史产出率规划请求数量
//! - `Generator` - 调用模型生成原始题目
//! - `BatchPersister` - 校验、去重、批量落盘
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一条任务"的完整处理流程
//! - `step` - 纯决策函数（达标 / 续跑 / 停滞 / 预算耗尽）
//! - `BackfillFlow` - 流程编排（claim → plan → generate → persist → commit）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/dispatcher` - 任务调度器，管理并发和租约回收
//! - `orchestrator/course_seeder` - 课程播种，入队第一条任务
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{BackfillPolicy, Config};
pub use error::{BackfillError, BackfillResult};
pub use infrastructure::{BackfillStore, MemoryStore};
pub use models::{BackfillJob, JobStatus, Question, Section};
pub use orchestrator::App;
pub use workflow::{BackfillCtx, BackfillFlow, RunOutcome};
