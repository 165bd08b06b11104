use anyhow::Result;
use question_backfill::{utils, App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load()?;

    // 初始化日志
    utils::init_tracing(&config.log_filter);

    // 初始化并运行应用
    let stats = App::initialize(config).await?.run().await?;

    if stats.failed_sections > 0 {
        std::process::exit(1);
    }
    Ok(())
}
