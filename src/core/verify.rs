//! 校验 - 比较两端的最新清单，可选逐字节摘要比对

use super::inventory::Inventory;
use crate::error::Result;
use crate::storage::ObjectStore;
use futures::StreamExt;

/// 报告中每类最多列出的条目数
pub const REPORT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeMismatch {
    pub name: String,
    pub source_size: u64,
    pub dest_size: u64,
}

/// 校验结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub source_count: usize,
    pub dest_count: usize,
    /// 目标端缺失
    pub missing: Vec<String>,
    pub size_mismatch: Vec<SizeMismatch>,
    /// 目标端独有，不影响结果
    pub extra: Vec<String>,
    /// 大小相同但内容摘要不同（仅深度校验）
    pub content_mismatch: Vec<String>,
    /// 深度校验时比对过的对象数
    pub digested: usize,
}

impl VerifyReport {
    /// 多余的对象不算失败
    pub fn passed(&self) -> bool {
        self.missing.is_empty() && self.size_mismatch.is_empty() && self.content_mismatch.is_empty()
    }
}

/// 按大小比较两份清单
pub fn compare_inventories(source: &Inventory, destination: &Inventory) -> VerifyReport {
    let mut report = VerifyReport {
        source_count: source.len(),
        dest_count: destination.len(),
        ..Default::default()
    };

    for (name, &size) in source {
        match destination.get(name) {
            None => report.missing.push(name.clone()),
            Some(&dest_size) if dest_size != size => report.size_mismatch.push(SizeMismatch {
                name: name.clone(),
                source_size: size,
                dest_size,
            }),
            Some(_) => {}
        }
    }

    report.extra = destination
        .keys()
        .filter(|name| !source.contains_key(*name))
        .cloned()
        .collect();

    report
}

/// 流式计算对象的 BLAKE3 摘要
pub async fn content_digest(store: &dyn ObjectStore, name: &str) -> Result<blake3::Hash> {
    let mut body = store.get_stream(name).await?;
    let mut hasher = blake3::Hasher::new();
    while let Some(chunk) = body.stream.next().await {
        hasher.update(&chunk?);
    }
    Ok(hasher.finalize())
}

/// 最多取 `limit` 条，剩余数量单独返回
pub fn truncated<T>(items: &[T], limit: usize) -> (&[T], usize) {
    let shown = items.len().min(limit);
    (&items[..shown], items.len() - shown)
}
