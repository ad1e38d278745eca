use crate::app::{App, UiShell};
use crate::config::Config;
use crate::controller::{OperationHandle, OperationObserver};
use crate::package_manager::{ListKind, ListRow, OperationState, SELF_UPDATE_NAME};
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "lian-scoop")]
#[command(version)]
#[command(about = "Scoop 包管理器的命令行前端", long_about = None)]
pub struct Cli {
    /// 指定配置文件（默认 ~/.config/lian-scoop/config.toml）
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 检查可更新的应用
    Status,
    /// 搜索应用
    Search {
        query: String,
    },
    /// 安装应用
    Install {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// 卸载应用
    Uninstall {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// 更新应用；不带参数时只更新 scoop 自身
    Update {
        packages: Vec<String>,
    },
}

/// 把操作事件直接打印到终端
#[derive(Debug, Default)]
pub struct ConsoleShell {
    progress_shown: bool,
}

impl ConsoleShell {
    fn end_progress(&mut self) {
        if self.progress_shown {
            println!();
            self.progress_shown = false;
        }
    }
}

impl OperationObserver for ConsoleShell {
    fn on_operation_state_changed(&mut self, handle: OperationHandle, state: OperationState) {
        self.end_progress();
        log::debug!("操作 {} -> {}", handle, state);
    }

    fn on_output_line(&mut self, _handle: OperationHandle, line: &str) {
        self.end_progress();
        println!("{}", line);
    }

    fn on_progress(&mut self, _handle: OperationHandle, text: &str) {
        print!("\r{}", text);
        // 进度行没有换行，需要手动刷新
        let _ = std::io::stdout().flush();
        self.progress_shown = true;
    }
}

impl UiShell for ConsoleShell {
    fn on_rows_changed(&mut self, list: ListKind, rows: &[ListRow]) {
        self.end_progress();
        if rows.is_empty() {
            match list {
                ListKind::Updates => println!("✓ 所有应用均为最新版本"),
                ListKind::SearchResults => println!("未找到匹配的应用"),
            }
            return;
        }
        let title = match list {
            ListKind::Updates => "可更新",
            ListKind::SearchResults => "搜索结果",
        };
        println!();
        println!("{} ({}):", title, rows.len());
        for row in rows {
            println!("  {}", row.display_text());
        }
    }

    fn on_selection_changed(&mut self, _list: ListKind, _ids: &[String]) {}
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let tick = Duration::from_millis(config.tick_ms.max(1));
    let mut app = App::new(&config, ConsoleShell::default());

    let handle = match cli.command {
        Commands::Status => app.request_refresh()?,
        Commands::Search { query } => app.request_search(&query)?,
        Commands::Install { packages } => app.request_install(&packages)?,
        Commands::Uninstall { packages } => app.request_uninstall(&packages)?,
        Commands::Update { packages } if packages.is_empty() => {
            app.request_update(&[SELF_UPDATE_NAME.to_string()])?
        }
        Commands::Update { packages } => app.request_update(&packages)?,
    };
    log::info!("已提交操作 {}", handle);

    let mut interval = tokio::time::interval(tick);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !app.tick().is_empty() {
                    break;
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                if app.request_cancel() {
                    eprintln!("\n正在取消...");
                }
            }
        }
    }

    let Some(op) = app.last_operation() else {
        bail!("操作 {} 未返回结果", handle);
    };
    match op.state {
        OperationState::Succeeded => {
            println!("{}", op.summary());
            Ok(())
        }
        _ => bail!("{}", op.summary()),
    }
}
