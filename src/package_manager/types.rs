//! PackageManager 相关数据类型定义

use std::fmt;
use std::path::PathBuf;

/// Scoop 自身在列表中的标识
pub const SELF_UPDATE_NAME: &str = "scoop";

/// 一次外部命令调用：程序 + 参数，可选工作目录与环境变量覆盖
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// 输出流的采集方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// stderr 合并进 stdout，一起流式输出（安装 / 卸载 / 更新）
    Combined,
    /// 只流式输出 stdout，stderr 单独采集用于错误诊断（状态 / 搜索）
    Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Status,
    Search,
    Install,
    Uninstall,
    Update,
}

impl OperationKind {
    pub fn subcommand(self) -> &'static str {
        match self {
            OperationKind::Status => "status",
            OperationKind::Search => "search",
            OperationKind::Install => "install",
            OperationKind::Uninstall => "uninstall",
            OperationKind::Update => "update",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Status => "检查更新",
            OperationKind::Search => "搜索",
            OperationKind::Install => "安装",
            OperationKind::Uninstall => "卸载",
            OperationKind::Update => "更新",
        }
    }

    /// 状态与搜索的输出需要解析，stderr 单独保留
    pub fn stream_mode(self) -> StreamMode {
        match self {
            OperationKind::Status | OperationKind::Search => StreamMode::Split,
            _ => StreamMode::Combined,
        }
    }
}

/// 操作生命周期：Pending → Running → Succeeded | Failed | Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Succeeded | OperationState::Failed | OperationState::Cancelled
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationState::Pending => "等待中",
            OperationState::Running => "运行中",
            OperationState::Succeeded => "成功",
            OperationState::Failed => "失败",
            OperationState::Cancelled => "已取消",
        };
        f.write_str(s)
    }
}

/// 列表中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListRow {
    /// 可更新的应用
    Update {
        name: String,
        current: String,
        available: String,
    },
    /// Scoop 自身可更新
    SelfUpdate { current: String, available: String },
    /// 搜索结果
    Search {
        name: String,
        version: String,
        source: String,
    },
}

impl ListRow {
    /// 行标识即包名
    pub fn name(&self) -> &str {
        match self {
            ListRow::Update { name, .. } | ListRow::Search { name, .. } => name,
            ListRow::SelfUpdate { .. } => SELF_UPDATE_NAME,
        }
    }

    pub fn is_self_update(&self) -> bool {
        matches!(self, ListRow::SelfUpdate { .. })
    }

    pub fn display_text(&self) -> String {
        match self {
            ListRow::Update {
                name,
                current,
                available,
            } => format!("{} (当前: {} -> 新版: {})", name, current, available),
            ListRow::SelfUpdate { current, available } => {
                format!("Scoop 自身更新 (当前: {} -> 新版: {})", current, available)
            }
            ListRow::Search {
                name,
                version,
                source,
            } => format!("{} (版本: {}, 来源: {})", name, version, source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Updates,
    SearchResults,
}

/// 一次更新请求的目标
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateTargets {
    pub self_update: bool,
    pub apps: Vec<String>,
}

impl UpdateTargets {
    pub fn is_empty(&self) -> bool {
        !self.self_update && self.apps.is_empty()
    }

    /// 更新完成后应从列表中移除的行
    pub fn row_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.apps.len() + 1);
        if self.self_update {
            names.push(SELF_UPDATE_NAME.to_string());
        }
        names.extend(self.apps.iter().cloned());
        names
    }
}
