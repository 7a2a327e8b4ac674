//! 应用配置模块
//!
//! 存储凭据来自环境变量，调优参数来自工作目录下的 `config.json`（`sync` 段）。

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件名
pub const CONFIG_FILE: &str = "config.json";

/// 源端必需的环境变量
pub const SOURCE_ENV_VARS: [&str; 4] = [
    "OSS_REGION",
    "OSS_ACCESS_KEY_ID",
    "OSS_ACCESS_KEY_SECRET",
    "OSS_BUCKET",
];

/// 目标端必需的环境变量
pub const DEST_ENV_VARS: [&str; 4] = [
    "AWS_REGION",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_BUCKET",
];

/// 设置后该端改用本地目录（用于演练）
pub const SOURCE_DIR_ENV: &str = "BUCKETSYNC_SOURCE_DIR";
pub const DEST_DIR_ENV: &str = "BUCKETSYNC_DEST_DIR";

/// 同步调优参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 检查点目录（相对工作目录）
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// 最大并发传输数，1 表示顺序传输
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 单个对象传输超时下限（秒）
    #[serde(default = "default_min_timeout_secs")]
    pub min_transfer_timeout_secs: u64,
    /// 每多少字节增加一档超时
    #[serde(default = "default_timeout_step_bytes")]
    pub timeout_step_bytes: u64,
    /// 每档增加的超时（秒）
    #[serde(default = "default_timeout_per_step_secs")]
    pub timeout_per_step_secs: u64,
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
    /// 流式读取的分块大小
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: u64,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".sync")
}

fn default_max_concurrent() -> usize {
    1
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_min_timeout_secs() -> u64 {
    600 // 10 分钟
}

fn default_timeout_step_bytes() -> u64 {
    100 * 1024 * 1024 // 100MiB
}

fn default_timeout_per_step_secs() -> u64 {
    60
}

fn default_list_page_size() -> usize {
    1000
}

fn default_read_chunk_bytes() -> u64 {
    8 * 1024 * 1024 // 8MiB
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            max_concurrent_transfers: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            min_transfer_timeout_secs: default_min_timeout_secs(),
            timeout_step_bytes: default_timeout_step_bytes(),
            timeout_per_step_secs: default_timeout_per_step_secs(),
            list_page_size: default_list_page_size(),
            read_chunk_bytes: default_read_chunk_bytes(),
        }
    }
}

impl SyncSettings {
    /// 从配置文件加载，文件缺失或格式错误时使用默认值
    pub fn load(work_dir: &Path) -> Self {
        let config_file = work_dir.join(CONFIG_FILE);
        fs::read_to_string(&config_file)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("sync").cloned())
            .and_then(|section| match serde_json::from_value::<SyncSettings>(section) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    tracing::warn!("config.json 中的 sync 配置无效，使用默认值: {}", e);
                    None
                }
            })
            .unwrap_or_default()
    }

    /// 检查点目录的绝对位置
    pub fn checkpoint_path(&self, work_dir: &Path) -> PathBuf {
        if self.checkpoint_dir.is_absolute() {
            self.checkpoint_dir.clone()
        } else {
            work_dir.join(&self.checkpoint_dir)
        }
    }
}

/// S3 兼容存储的连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
    pub prefix: Option<String>,
    /// 阿里云 OSS 只接受虚拟主机风格的请求
    pub virtual_host_style: bool,
}

/// 单端存储配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSettings {
    S3(S3Settings),
    /// 本地目录
    Local { root: PathBuf },
}

/// 运行所需的全部配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: StoreSettings,
    pub destination: StoreSettings,
    pub settings: SyncSettings,
}

impl AppConfig {
    /// 从进程环境变量与工作目录加载
    pub fn from_env(work_dir: &Path) -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), SyncSettings::load(work_dir))
    }

    /// 缺失的必需项会一次性全部报告
    pub fn from_lookup<F>(lookup: F, settings: SyncSettings) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut missing = Vec::new();

        let source_dir = get(SOURCE_DIR_ENV).map(PathBuf::from);
        let dest_dir = get(DEST_DIR_ENV).map(PathBuf::from);

        if source_dir.is_none() {
            missing.extend(
                SOURCE_ENV_VARS
                    .iter()
                    .filter(|&&key| get(key).is_none())
                    .map(|key| key.to_string()),
            );
        }
        if dest_dir.is_none() {
            missing.extend(
                DEST_ENV_VARS
                    .iter()
                    .filter(|&&key| get(key).is_none())
                    .map(|key| key.to_string()),
            );
        }

        if !missing.is_empty() {
            return Err(SyncError::Configuration { missing });
        }

        let source = match source_dir {
            Some(root) => StoreSettings::Local { root },
            None => {
                let region = get("OSS_REGION").unwrap_or_default();
                StoreSettings::S3(S3Settings {
                    endpoint: Some(get("OSS_ENDPOINT").unwrap_or_else(|| oss_endpoint(&region))),
                    region: oss_signing_region(&region),
                    bucket: get("OSS_BUCKET").unwrap_or_default(),
                    access_key_id: get("OSS_ACCESS_KEY_ID").unwrap_or_default(),
                    secret_access_key: get("OSS_ACCESS_KEY_SECRET").unwrap_or_default(),
                    prefix: get("OSS_PREFIX"),
                    virtual_host_style: true,
                })
            }
        };

        let destination = match dest_dir {
            Some(root) => StoreSettings::Local { root },
            None => StoreSettings::S3(S3Settings {
                bucket: get("AWS_BUCKET").unwrap_or_default(),
                region: get("AWS_REGION").unwrap_or_default(),
                access_key_id: get("AWS_ACCESS_KEY_ID").unwrap_or_default(),
                secret_access_key: get("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
                endpoint: get("AWS_ENDPOINT"),
                prefix: get("AWS_PREFIX"),
                virtual_host_style: false,
            }),
        };

        Ok(Self {
            source,
            destination,
            settings,
        })
    }
}

/// OSS 区域既可能写作 `oss-cn-hangzhou` 也可能写作 `cn-hangzhou`
fn oss_endpoint(region: &str) -> String {
    let region = region.trim();
    if region.starts_with("oss-") {
        format!("https://{}.aliyuncs.com", region)
    } else {
        format!("https://oss-{}.aliyuncs.com", region)
    }
}

fn oss_signing_region(region: &str) -> String {
    region.trim().trim_start_matches("oss-").to_string()
}
