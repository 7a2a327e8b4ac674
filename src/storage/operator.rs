//! 基于 OpenDAL Operator 的对象存储实现，S3 与本地目录共用

use super::{ListPage, ObjectEntry, ObjectStore, ObjectStream, DEFAULT_CONTENT_TYPE};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use opendal::{Builder, ErrorKind, Metakey, Operator, Reader, Writer};
use std::time::Duration;
use tracing::warn;

pub struct OperatorStore {
    operator: Operator,
    name: String,
    /// 每次读取的字节数，决定传输时的内存上限
    read_chunk: u64,
}

impl OperatorStore {
    /// 列举不设超时，传输的期限由调用方按对象大小给出
    pub(super) fn from_builder<B: Builder>(builder: B, name: String, read_chunk: u64) -> Result<Self> {
        let operator = Operator::new(builder)?.finish();

        Ok(Self {
            operator,
            name,
            read_chunk: read_chunk.max(1),
        })
    }

    /// 服务端能否从指定 key 之后继续列举
    fn supports_paging(&self) -> bool {
        self.operator.info().full_capability().list_with_start_after
    }

    /// 放弃一次未完成的写入
    ///
    /// 不支持中止的服务（如未配置临时目录的本地目录）改为删除残留对象。
    async fn discard(&self, name: &str, mut writer: Writer) {
        if let Err(e) = writer.abort().await {
            warn!("中止写入失败 {}: {}，删除残留对象", name, e);
            drop(writer);
            if let Err(e) = self.operator.delete(name).await {
                warn!("删除残留对象失败 {}: {}", name, e);
            }
        }
    }

    fn not_found(&self, name: &str) -> SyncError {
        SyncError::ObjectNotFound {
            store: self.name.clone(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for OperatorStore {
    async fn list_page(&self, token: Option<&str>, limit: usize) -> Result<ListPage> {
        let paged = self.supports_paging();
        let mut request = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::Mode);
        if paged {
            if let Some(token) = token {
                request = request.start_after(token);
            }
        }
        let mut lister = request.await?;

        let mut entries = Vec::new();
        while let Some(entry) = lister.try_next().await? {
            let meta = entry.metadata();
            if meta.is_dir() {
                continue;
            }

            let name = entry.path().trim_start_matches('/');
            // 跳过根目录
            if name.is_empty() {
                continue;
            }

            entries.push(ObjectEntry::new(name, meta.content_length()));

            if paged && entries.len() >= limit.max(1) {
                let next_token = entries.last().map(|e| e.name.clone());
                return Ok(ListPage {
                    entries,
                    next_token,
                });
            }
        }

        // 不支持续页的服务一次返回全部
        Ok(ListPage {
            entries,
            next_token: None,
        })
    }

    async fn head_size(&self, name: &str) -> Result<Option<u64>> {
        match self.operator.stat(name).await {
            Ok(meta) if meta.is_dir() => Ok(None),
            Ok(meta) => Ok(Some(meta.content_length())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_stream(&self, name: &str) -> Result<ObjectStream> {
        let meta = match self.operator.stat(name).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.not_found(name)),
            Err(e) => return Err(e.into()),
        };
        let content_length = meta.content_length();
        let content_type = meta
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let reader = self.operator.reader(name).await?;
        let chunk = self.read_chunk;

        // 按区间分块读取，内存中最多只有一个分块
        let stream = futures::stream::try_unfold((reader, 0u64), move |(reader, offset)| {
            next_chunk(reader, offset, content_length, chunk)
        })
        .boxed();

        Ok(ObjectStream {
            stream,
            content_length,
            content_type,
        })
    }

    async fn put_stream(&self, name: &str, mut body: ObjectStream, timeout: Duration) -> Result<u64> {
        let mut request = self.operator.writer_with(name);
        // 本地目录不支持设置内容类型
        if self.operator.info().full_capability().write_with_content_type {
            request = request.content_type(&body.content_type);
        }
        let mut writer = request.await?;

        match tokio::time::timeout(timeout, write_all(&mut writer, &mut body)).await {
            Ok(Ok(written)) => Ok(written),
            Ok(Err(e)) => {
                self.discard(name, writer).await;
                Err(e)
            }
            Err(_) => {
                self.discard(name, writer).await;
                Err(SyncError::Timeout { after: timeout })
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 逐块写入并提交，失败时由调用方中止
async fn write_all(writer: &mut Writer, body: &mut ObjectStream) -> Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = body.stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        writer.write(chunk).await?;
    }
    writer.close().await?;
    Ok(written)
}

/// 读取 `[offset, offset + chunk)` 区间，读到末尾时结束
async fn next_chunk(
    reader: Reader,
    offset: u64,
    content_length: u64,
    chunk: u64,
) -> Result<Option<(Bytes, (Reader, u64))>> {
    if offset >= content_length {
        return Ok(None);
    }
    let end = (offset + chunk).min(content_length);
    let buf = reader.read(offset..end).await?;
    if buf.is_empty() {
        return Ok(None);
    }
    let next = offset + buf.len() as u64;
    Ok(Some((buf.to_bytes(), (reader, next))))
}
