//! 任务调度器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责任务的调度和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：创建存储、规划器、生成器和回填流程
//! 2. **播种**：扫描种子文件，写入章节并入队第一条任务
//! 3. **事件驱动**：每收到一个"任务已创建"事件，就调度一次回填流程
//! 4. **并发控制**：使用 Semaphore 限制同时运行的任务数量
//! 5. **租约回收**：定时回收租约过期的任务
//! 6. **全局统计**：所有任务链结束后汇总章节状态
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单条任务的细节，全部委托给 `BackfillFlow`
//! - **空闲即退出**：没有运行中的任务且通道为空时结束；
//!   续跑任务在上一条任务返回之前就已发布，不会漏掉

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::infrastructure::{BackfillStore, MemoryStore};
use crate::models::{CourseSeed, QuestionsStatus};
use crate::orchestrator::course_seeder;
use crate::services::{Generator, LlmGenerator, Planner, YieldPlanner};
use crate::utils::{log_startup, print_final_stats, FinalStats};
use crate::workflow::{BackfillFlow, RunOutcome};

/// 应用主结构
pub struct App {
    config: Config,
    store: Arc<dyn BackfillStore>,
    flow: Arc<BackfillFlow>,
    triggers: mpsc::UnboundedReceiver<String>,
}

impl App {
    /// 初始化应用：内存存储 + 产出率规划器 + LLM 生成器
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let (tx, rx) = mpsc::unbounded_channel();
        let store: Arc<dyn BackfillStore> = Arc::new(MemoryStore::with_trigger(tx));
        let planner: Arc<dyn Planner> = Arc::new(YieldPlanner::new(&config));
        let generator: Arc<dyn Generator> = Arc::new(LlmGenerator::new(&config)?);

        Ok(Self::new(config, store, rx, planner, generator))
    }

    /// 使用外部提供的组件创建应用
    ///
    /// `triggers` 必须是 `store` 发布新任务 ID 的通道接收端
    pub fn new(
        config: Config,
        store: Arc<dyn BackfillStore>,
        triggers: mpsc::UnboundedReceiver<String>,
        planner: Arc<dyn Planner>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let flow = Arc::new(BackfillFlow::new(
            &config,
            store.clone(),
            planner,
            generator,
        ));
        Self {
            config,
            store,
            flow,
            triggers,
        }
    }

    /// 运行应用主逻辑
    pub async fn run(&mut self) -> Result<FinalStats> {
        let courses = self.load_seeds().await?;

        if courses.is_empty() {
            warn!("⚠️ 没有找到待处理的种子文件，程序结束");
            return Ok(FinalStats::default());
        }

        self.seed(&courses).await?;

        let mut stats = self.dispatch().await?;
        self.summarize(&courses, &mut stats).await?;

        print_final_stats(&stats);
        Ok(stats)
    }

    /// 加载种子文件
    async fn load_seeds(&self) -> Result<Vec<CourseSeed>> {
        info!("\n📁 正在扫描种子文件...");
        crate::models::load_all_seed_files(&self.config.seed_folder).await
    }

    /// 写入章节并入队第一条任务
    pub async fn seed(&self, courses: &[CourseSeed]) -> Result<()> {
        let results = futures::future::join_all(courses.iter().map(|course| {
            course_seeder::seed_course(self.store.as_ref(), course, &self.config.policy)
        }))
        .await;

        let mut enqueued = 0;
        for result in results {
            enqueued += result?.enqueued;
        }
        info!("✓ 共入队 {} 个章节\n", enqueued);
        Ok(())
    }

    /// 事件循环：调度任务直到全部任务链结束
    pub async fn dispatch(&mut self) -> Result<FinalStats> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let mut tasks: JoinSet<RunOutcome> = JoinSet::new();
        let mut stats = FinalStats::default();

        let mut sweep = tokio::time::interval(Duration::from_millis(
            self.config.sweep_interval_ms.max(1),
        ));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即完成
        sweep.tick().await;

        loop {
            tokio::select! {
                Some(job_id) = self.triggers.recv() => {
                    self.spawn_job(&mut tasks, &semaphore, job_id).await?;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(RunOutcome::NotClaimed) => {}
                        // 回收后的续跑任务会再次触发
                        Ok(RunOutcome::LeaseLost) => debug!("任务租约丢失，结果已丢弃"),
                        Ok(outcome) => {
                            stats.jobs += 1;
                            debug!("任务结束: {:?}", outcome);
                        }
                        Err(e) => error!("❌ 任务执行失败: {}", e),
                    }
                }
                _ = sweep.tick() => {
                    match self.flow.reap_abandoned().await {
                        Ok(0) => {}
                        Ok(n) => {
                            warn!("⚠️ 回收 {} 条租约过期的任务", n);
                            stats.reaped += n;
                        }
                        Err(e) => error!("❌ 回收过期任务失败: {}", e),
                    }
                }
            }

            if tasks.is_empty() {
                match self.triggers.try_recv() {
                    Ok(job_id) => self.spawn_job(&mut tasks, &semaphore, job_id).await?,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }

        Ok(stats)
    }

    async fn spawn_job(
        &self,
        tasks: &mut JoinSet<RunOutcome>,
        semaphore: &Arc<Semaphore>,
        job_id: String,
    ) -> Result<()> {
        let permit = semaphore.clone().acquire_owned().await?;
        let flow = self.flow.clone();
        tasks.spawn(async move {
            let _permit = permit;
            flow.run(&job_id).await
        });
        Ok(())
    }

    /// 汇总所有种子章节的最终状态
    async fn summarize(&self, courses: &[CourseSeed], stats: &mut FinalStats) -> Result<()> {
        for course in courses {
            for seed in &course.sections {
                let Some(section) = self.store.get_section(&course.course_id, &seed.id).await?
                else {
                    continue;
                };
                match section.questions_status {
                    QuestionsStatus::Completed => stats.completed_sections += 1,
                    QuestionsStatus::Failed => {
                        stats.failed_sections += 1;
                        warn!(
                            "❌ 章节 {}: {}",
                            seed.id,
                            section.questions_error_message.as_deref().unwrap_or("未知错误")
                        );
                    }
                    _ => {}
                }
                stats.total_questions += section.questions_count;
            }
        }
        Ok(())
    }
}
