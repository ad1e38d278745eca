use crate::controller::OperationHandle;
use std::path::PathBuf;
use thiserror::Error;

/// 用户请求被拒绝的原因（同步返回给调用方，不进入操作生命周期）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("操作 {0} 仍在运行，请等待其完成或先取消")]
    Busy(OperationHandle),
    #[error("没有选中可操作的软件包")]
    NothingSelected,
    #[error("请输入要搜索的应用名称")]
    EmptyQuery,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path} 失败: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
