use anyhow::Result;
use study_assistant::utils::logging;
use study_assistant::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load("config.toml")?;

    // 初始化日志
    logging::init(config.verbose_logging);
    logging::log_startup(&config);

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
