use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 环境变量中指定 scoop 可执行文件
pub const EXECUTABLE_ENV: &str = "LIAN_SCOOP_BIN";
const DEFAULT_EXECUTABLE: &str = "scoop";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// scoop 可执行文件；优先级：配置文件 > LIAN_SCOOP_BIN > "scoop"
    pub executable: Option<String>,
    pub working_dir: Option<PathBuf>,
    /// 追加给子进程的环境变量
    pub env: BTreeMap<String, String>,
    /// UI 线程取事件的间隔（毫秒）
    pub tick_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executable: None,
            working_dir: None,
            env: BTreeMap::new(),
            tick_ms: 50,
        }
    }
}

impl Config {
    /// `~/.config/lian-scoop/config.toml`，Windows 上 HOME 不存在时用 USERPROFILE
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".config/lian-scoop/config.toml")
    }

    pub fn load_or_default() -> Result<Self, ConfigError> {
        let config_path = Self::default_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            log::debug!("配置文件 {} 不存在，使用默认配置", config_path.display());
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("已加载配置 {}", path.display());
        Ok(config)
    }

    pub fn resolved_executable(&self) -> String {
        self.executable
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                std::env::var(EXECUTABLE_ENV)
                    .ok()
                    .filter(|s| !s.trim().is_empty())
            })
            .unwrap_or_else(|| DEFAULT_EXECUTABLE.to_string())
    }
}
