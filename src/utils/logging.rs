/// 日志工具模块
///
/// 提供日志初始化和格式化输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化全局日志
///
/// `RUST_LOG` 优先，其次使用配置中的过滤规则；重复初始化直接忽略
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 题目回填模式");
    info!("📊 最大并发任务数: {}", config.max_concurrent_jobs);
    info!("🤖 模型: {}", config.llm_model_name);
    info!(
        "🎯 单章节目标上限: {}，每步最多增加 {} 道",
        config.policy.max_target, config.policy.step_increment
    );
    info!("{}", "=".repeat(60));
}

/// 全部任务结束后的统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FinalStats {
    /// 处理的任务总数（含续跑任务）
    pub jobs: usize,
    pub completed_sections: usize,
    pub failed_sections: usize,
    pub total_questions: u32,
    /// 被租约回收的任务
    pub reaped: usize,
}

/// 打印最终统计信息
pub fn print_final_stats(stats: &FinalStats) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("🔁 处理任务: {}", stats.jobs);
    info!("✅ 完成章节: {}", stats.completed_sections);
    info!("❌ 失败章节: {}", stats.failed_sections);
    info!("📝 题目总数: {}", stats.total_questions);
    if stats.reaped > 0 {
        info!("⚠️ 回收过期任务: {}", stats.reaped);
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
