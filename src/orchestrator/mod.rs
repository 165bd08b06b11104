//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责播种和任务调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `dispatcher` - 任务调度器
//! - 管理应用生命周期（初始化、运行、统计）
//! - 监听"任务已创建"事件，每个事件调度一次回填流程
//! - 控制并发数量（Semaphore + JoinSet）
//! - 定时回收租约过期的任务
//!
//! ### `course_seeder` - 单门课程播种
//! - 写入章节及其出题蓝图
//! - 为每个章节入队第一条任务
//!
//! ## 层次关系
//!
//! ```text
//! dispatcher (处理任务事件流)
//!     ↓
//! workflow::BackfillFlow (处理单条任务)
//!     ↓
//! services (能力层：planner / generator / dedup / persister)
//!     ↓
//! infrastructure (基础设施：BackfillStore)
//! ```
//!
//! ## 设计原则
//!
//! 1. **向下依赖**：编排层 → workflow → services → infrastructure
//! 2. **无业务逻辑**：只做调度和统计，不做具体业务判断

pub mod course_seeder;
pub mod dispatcher;

// 重新导出主要类型
pub use course_seeder::{seed_course, SeedStats};
pub use dispatcher::App;
