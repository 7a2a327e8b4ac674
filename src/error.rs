//! 错误类型
//!
//! 只有列举失败和配置错误会中止整次运行，其余错误都在传输循环内被计数并记录。

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// 某一页列举失败，整个清单作废
    #[error("listing {store} failed: {source}")]
    Listing {
        store: String,
        #[source]
        source: Box<SyncError>,
    },

    #[error("checkpoint {} is unreadable: {reason}", .path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error("bad journal line {line:?}: {reason}")]
    JournalLineCorrupt { line: String, reason: String },

    #[error("object {name} not found in {store}")]
    ObjectNotFound { store: String, name: String },

    #[error("transfer of {name} failed: {source}")]
    Transfer {
        name: String,
        #[source]
        source: Box<SyncError>,
    },

    /// 通常包在 `Transfer` 里，对象名由外层给出
    #[error("timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    #[error("missing required configuration: {}", .missing.join(", "))]
    Configuration { missing: Vec<String> },

    #[error("storage error: {0}")]
    Storage(#[from] opendal::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn listing(store: impl Into<String>, source: SyncError) -> Self {
        SyncError::Listing {
            store: store.into(),
            source: Box::new(source),
        }
    }

    pub fn transfer(name: impl Into<String>, source: SyncError) -> Self {
        SyncError::Transfer {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// 对象缺失是永久性错误，重试没有意义
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::ObjectNotFound { .. } => true,
            SyncError::Transfer { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_lists_every_missing_key() {
        let err = SyncError::Configuration {
            missing: vec!["OSS_BUCKET".into(), "AWS_REGION".into()],
        };
        assert_eq!(
            err.to_string(),
            "missing required configuration: OSS_BUCKET, AWS_REGION"
        );
    }

    #[test]
    fn not_found_is_seen_through_transfer_wrapper() {
        let inner = SyncError::ObjectNotFound {
            store: "mem://src".into(),
            name: "a".into(),
        };
        assert!(SyncError::transfer("a", inner).is_not_found());
        let io = SyncError::Io(std::io::Error::other("boom"));
        assert!(!SyncError::transfer("a", io).is_not_found());
    }
}
