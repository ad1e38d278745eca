//! lian-scoop：Scoop 包管理器前端的异步命令执行核心

pub mod app;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod list_model;
pub mod package_manager;
pub mod relay;

#[cfg(all(test, unix))]
mod test_support;

pub use app::{App, UiShell};
pub use config::Config;
pub use controller::{Operation, OperationController, OperationHandle, OperationObserver};
pub use error::{ConfigError, RequestError};
pub use list_model::ListModel;
