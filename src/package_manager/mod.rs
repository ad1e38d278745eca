//! 包管理器模块：对 scoop 命令行的封装

pub mod parser;
pub mod streaming;
pub mod types;

// 重新导出常用类型
pub use streaming::{ProcessError, ProcessEvent, ProcessExit, ProcessKiller, ProcessRun};
pub use types::{
    CommandLine, ListKind, ListRow, OperationKind, OperationState, StreamMode, UpdateTargets,
    SELF_UPDATE_NAME,
};

use crate::config::Config;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 构造各类 scoop 命令
#[derive(Debug, Clone)]
pub struct Scoop {
    pub command: String,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl Scoop {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            command: config.resolved_executable(),
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.command
    }

    fn base(&self, kind: OperationKind) -> CommandLine {
        let mut cmd = CommandLine::new(&self.command).arg(kind.subcommand());
        if let Some(dir) = &self.working_dir {
            cmd = cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd = cmd.env(key, value);
        }
        cmd
    }

    // ===== 查询 =====

    pub fn status(&self) -> CommandLine {
        self.base(OperationKind::Status)
    }

    pub fn search(&self, query: &str) -> CommandLine {
        self.base(OperationKind::Search).arg(query.trim())
    }

    // ===== 变更 =====

    pub fn install(&self, names: &[String]) -> CommandLine {
        self.base(OperationKind::Install).args(names)
    }

    pub fn uninstall(&self, names: &[String]) -> CommandLine {
        self.base(OperationKind::Uninstall).args(names)
    }

    /// 只更新 scoop 自身时不带参数；同时更新应用时把 `scoop` 放在最前
    pub fn update(&self, targets: &UpdateTargets) -> CommandLine {
        let cmd = self.base(OperationKind::Update);
        if targets.apps.is_empty() {
            return cmd;
        }
        let cmd = if targets.self_update {
            cmd.arg(SELF_UPDATE_NAME)
        } else {
            cmd
        };
        cmd.args(&targets.apps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn update_arguments_follow_targets() {
        let scoop = Scoop::new("scoop");
        let self_only = UpdateTargets {
            self_update: true,
            apps: Vec::new(),
        };
        assert_eq!(scoop.update(&self_only).args, names(&["update"]));

        let both = UpdateTargets {
            self_update: true,
            apps: names(&["git", "7zip"]),
        };
        assert_eq!(scoop.update(&both).args, names(&["update", "scoop", "git", "7zip"]));

        let apps = UpdateTargets {
            self_update: false,
            apps: names(&["git"]),
        };
        assert_eq!(scoop.update(&apps).args, names(&["update", "git"]));
    }

    #[test]
    fn commands_carry_config_overrides() {
        let mut config = Config {
            executable: Some("/opt/scoop/bin/scoop".to_string()),
            working_dir: Some(PathBuf::from("/tmp")),
            ..Config::default()
        };
        config
            .env
            .insert("SCOOP".to_string(), "/opt/scoop".to_string());

        let cmd = Scoop::from_config(&config).search("  git ");
        assert_eq!(cmd.program, "/opt/scoop/bin/scoop");
        assert_eq!(cmd.args, names(&["search", "git"]));
        assert_eq!(cmd.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(cmd.env, vec![("SCOOP".to_string(), "/opt/scoop".to_string())]);
        assert_eq!(cmd.to_string(), "/opt/scoop/bin/scoop search git");
    }

    #[test]
    fn install_and_uninstall_pass_names_through() {
        let scoop = Scoop::new("scoop");
        assert_eq!(scoop.status().args, names(&["status"]));
        assert_eq!(
            scoop.install(&names(&["git", "nodejs"])).args,
            names(&["install", "git", "nodejs"])
        );
        assert_eq!(
            scoop.uninstall(&names(&["git"])).args,
            names(&["uninstall", "git"])
        );
    }
}
