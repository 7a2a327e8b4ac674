//! 日志模块 - 控制台输出 + 检查点目录下的文件日志

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志文件名
pub const LOG_FILE: &str = "bucketsync.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否写入日志文件
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 从 config.json 的 `log` 段加载
    pub fn load(work_dir: &Path) -> Self {
        fs::read_to_string(work_dir.join(crate::config::CONFIG_FILE))
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("log").cloned())
            .and_then(|log| serde_json::from_value::<LogConfig>(log).ok())
            .unwrap_or_default()
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }

    /// `RUST_LOG` 优先，其次使用配置的级别
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // 隐藏 SDK 的噪音
            EnvFilter::new(format!(
                "{},opendal=warn,hyper=warn,reqwest=warn",
                self.tracing_level().as_str().to_lowercase()
            ))
        })
    }
}

/// 初始化日志系统
///
/// 返回的 guard 需要保持到进程退出，否则文件日志会丢失尾部内容。
pub fn init_logging(config: &LogConfig, log_dir: &Path) -> Option<WorkerGuard> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if config.enabled && fs::create_dir_all(log_dir).is_ok() {
        let appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false);

        let _ = tracing_subscriber::registry()
            .with(config.env_filter())
            .with(console_layer)
            .with(file_layer)
            .try_init();
        return Some(guard);
    }

    let _ = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(console_layer)
        .try_init();
    None
}
