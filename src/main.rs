use anyhow::Result;
use clap::Parser;
use lian_scoop::cli::{self, Cli};
use lian_scoop::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    // 配置文件优先级：--config > 默认路径 > 内置默认值
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default()?,
    };

    cli::run(cli, config).await?;

    Ok(())
}
