//! 对象清单 - 分页列举一个存储的全部对象

use crate::error::{Result, SyncError};
use crate::storage::ObjectStore;
use std::collections::BTreeMap;
use tracing::debug;

/// 对象名 -> 字节数
pub type Inventory = BTreeMap<String, u64>;

/// 逐页列举直到没有续页标记
///
/// 任意一页失败都会让整个清单作废，不会返回部分结果。
pub async fn list_inventory(store: &dyn ObjectStore, page_size: usize) -> Result<Inventory> {
    let mut inventory = Inventory::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = store
            .list_page(token.as_deref(), page_size)
            .await
            .map_err(|e| SyncError::listing(store.name(), e))?;
        pages += 1;

        // 同名对象以后出现的为准
        for entry in page.entries {
            inventory.insert(entry.name, entry.size);
        }

        match page.next_token {
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                return Err(SyncError::listing(
                    store.name(),
                    SyncError::Io(std::io::Error::other(format!(
                        "continuation token {:?} did not advance",
                        next
                    ))),
                ));
            }
            Some(next) => token = Some(next),
            None => break,
        }
    }

    debug!(
        "列举完成: {} 共 {} 个对象 ({} 页)",
        store.name(),
        inventory.len(),
        pages
    );
    Ok(inventory)
}

/// 清单总字节数
pub fn total_bytes(inventory: &Inventory) -> u64 {
    inventory.values().sum()
}
