pub mod local;
#[cfg(test)]
pub mod memory;
pub mod operator;
pub mod s3;

use crate::config::StoreSettings;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub use operator::OperatorStore;

/// 未知内容类型时的默认值
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// 列举出的对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub name: String,
    pub size: u64,
}

impl ObjectEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// 一页列举结果，`next_token` 为空表示已到末尾
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<ObjectEntry>,
    pub next_token: Option<String>,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// 对象内容流
pub struct ObjectStream {
    pub stream: ByteStream,
    /// 为 0 表示未知
    pub content_length: u64,
    pub content_type: String,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// 对象存储抽象接口
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 列举一页对象，`token` 为上一页返回的续页标记
    async fn list_page(&self, token: Option<&str>, limit: usize) -> Result<ListPage>;

    /// 对象大小，不存在时返回 None
    async fn head_size(&self, name: &str) -> Result<Option<u64>>;

    /// 打开对象的读取流，对象不存在时返回 `ObjectNotFound`
    async fn get_stream(&self, name: &str) -> Result<ObjectStream>;

    /// 把流写入对象，返回写入的字节数
    ///
    /// 超过 `timeout` 时返回 `Timeout`，并且不能在目标端留下写了一半的对象。
    async fn put_stream(&self, name: &str, body: ObjectStream, timeout: Duration) -> Result<u64>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
pub fn create_store(settings: &StoreSettings, read_chunk: u64) -> Result<Arc<dyn ObjectStore>> {
    let store = match settings {
        StoreSettings::Local { root } => {
            tracing::info!("初始化本地存储: {}", root.display());
            OperatorStore::local(root, read_chunk)?
        }
        StoreSettings::S3(s3) => {
            tracing::info!("初始化S3存储: bucket={}, region={}", s3.bucket, s3.region);
            OperatorStore::s3(s3, read_chunk)?
        }
    };
    Ok(Arc::new(store) as Arc<dyn ObjectStore>)
}
