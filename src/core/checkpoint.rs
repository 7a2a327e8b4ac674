//! 检查点 - 清单快照 + 追加式完成日志
//!
//! 快照记录运行开始时两端的清单，日志记录此后每个传输完成的对象。
//! 日志只相对于写入它之前的那份快照有效，所以保存新快照会删除旧日志。

use super::inventory::Inventory;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub const SNAPSHOT_FILE: &str = "snapshot.json";
pub const JOURNAL_FILE: &str = "journal.log";

/// 日志行中对象名与大小的分隔符
const JOURNAL_SEPARATOR: &str = "::";

/// 磁盘上的快照格式
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    /// 毫秒时间戳
    pub timestamp: i64,
    pub source: Inventory,
    pub destination: Inventory,
}

/// 恢复出的检查点（日志已回放到目标清单上）
#[derive(Debug, Clone)]
pub struct RestoredCheckpoint {
    pub source: Inventory,
    pub destination: Inventory,
    pub timestamp: i64,
    /// 成功回放的日志行数
    pub journal_applied: usize,
    /// 被跳过的损坏行数
    pub journal_skipped: usize,
}

/// 检查点管理器，目录由单个运行实例独占
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// 只看快照，没有快照的日志不算检查点
    pub fn has_checkpoint(&self) -> bool {
        self.snapshot_path().is_file()
    }

    /// 写入新快照并清空旧日志
    ///
    /// 先写临时文件再重命名，读取方不会看到写了一半的快照。
    pub fn save_snapshot(&self, source: &Inventory, destination: &Inventory) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let record = SnapshotRecord {
            timestamp: chrono::Utc::now().timestamp_millis(),
            source: source.clone(),
            destination: destination.clone(),
        };
        let data = serde_json::to_vec(&record)?;

        let tmp = self.dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        // 先删旧日志再替换快照
        remove_if_exists(&self.journal_path())?;
        fs::rename(&tmp, self.snapshot_path())?;

        info!(
            "已保存检查点快照: 源 {} 个对象, 目标 {} 个对象",
            source.len(),
            destination.len()
        );
        Ok(())
    }

    /// 读取快照并回放日志
    ///
    /// 快照缺失或损坏都返回 None，调用方应当重新列举。
    pub fn load_snapshot(&self) -> Option<RestoredCheckpoint> {
        if !self.has_checkpoint() {
            return None;
        }

        let record = match self.read_snapshot() {
            Ok(record) => record,
            Err(e) => {
                warn!("检查点不可用，将重新列举: {}", e);
                return None;
            }
        };

        let mut restored = RestoredCheckpoint {
            source: record.source,
            destination: record.destination,
            timestamp: record.timestamp,
            journal_applied: 0,
            journal_skipped: 0,
        };

        match fs::read_to_string(self.journal_path()) {
            Ok(content) => {
                for line in content.lines().filter(|l| !l.trim().is_empty()) {
                    match parse_journal_line(line) {
                        Ok((name, size)) => {
                            restored.destination.insert(name, size);
                            restored.journal_applied += 1;
                        }
                        Err(e) => {
                            warn!("跳过日志行: {}", e);
                            restored.journal_skipped += 1;
                        }
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("读取完成日志失败，忽略日志: {}", e),
        }

        debug!(
            "检查点回放: {} 行生效, {} 行跳过",
            restored.journal_applied, restored.journal_skipped
        );
        Some(restored)
    }

    fn read_snapshot(&self) -> Result<SnapshotRecord> {
        let path = self.snapshot_path();
        let corrupt = |reason: String| SyncError::CheckpointCorrupt {
            path: path.clone(),
            reason,
        };
        let data = fs::read(&path).map_err(|e| corrupt(e.to_string()))?;
        serde_json::from_slice(&data).map_err(|e| corrupt(e.to_string()))
    }

    /// 追加一条完成记录并落盘
    pub fn append_journal(&self, name: &str, size: u64) -> Result<()> {
        // 换行会把一条记录拆成两行
        if name.contains(['\n', '\r']) {
            return Err(SyncError::JournalLineCorrupt {
                line: name.to_string(),
                reason: "object name contains a line break".into(),
            });
        }

        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path())?;
        file.write_all(format_journal_line(name, size).as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// 删除快照与日志，重复调用无副作用
    pub fn clear(&self) -> Result<()> {
        remove_if_exists(&self.snapshot_path())?;
        remove_if_exists(&self.journal_path())?;
        Ok(())
    }

    /// 快照最后写入至今的时长，无检查点时为 0
    pub fn age(&self) -> Duration {
        fs::metadata(self.snapshot_path())
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or(Duration::ZERO)
    }

    /// 日志中的非空行数
    pub fn journal_len(&self) -> usize {
        fs::read_to_string(self.journal_path())
            .map(|content| content.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn format_journal_line(name: &str, size: u64) -> String {
    format!("{}{}{}\n", name, JOURNAL_SEPARATOR, size)
}

/// 解析一行 `name::size`
///
/// 按最后一个分隔符切分，对象名本身可以包含 `::`。
pub fn parse_journal_line(line: &str) -> Result<(String, u64)> {
    let corrupt = |reason: &str| SyncError::JournalLineCorrupt {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let line = line.trim_end_matches(['\r', '\n']);
    let (name, size) = line
        .rsplit_once(JOURNAL_SEPARATOR)
        .ok_or_else(|| corrupt("missing separator"))?;
    if name.is_empty() {
        return Err(corrupt("empty object name"));
    }
    let size = size
        .trim()
        .parse::<u64>()
        .map_err(|_| corrupt("size is not a non-negative integer"))?;
    Ok((name.to_string(), size))
}

/// 格式化时长
pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    if secs < 60 {
        format!("{}秒前", secs)
    } else if secs < 3600 {
        format!("{}分钟前", secs / 60)
    } else if secs < 86400 {
        format!("{}小时前", secs / 3600)
    } else {
        format!("{}天前", secs / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn inventory(entries: &[(&str, u64)]) -> Inventory {
        entries.iter().map(|(n, s)| (n.to_string(), *s)).collect()
    }

    fn store() -> (TempDir, CheckpointStore) {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join(".sync"));
        (dir, store)
    }

    #[test]
    fn test_snapshot_round_trip() {
        let (_dir, store) = store();
        let source = inventory(&[("a", 10), ("b", 20)]);
        let destination = inventory(&[("a", 10)]);

        store.save_snapshot(&source, &destination).unwrap();
        let restored = store.load_snapshot().unwrap();

        assert_eq!(restored.source, source);
        assert_eq!(restored.destination, destination);
        assert_eq!(restored.journal_applied, 0);
        assert!(restored.timestamp > 0);
    }

    #[test]
    fn test_journal_replay_last_entry_wins() {
        let (_dir, store) = store();
        store.save_snapshot(&Inventory::new(), &Inventory::new()).unwrap();

        store.append_journal("f1", 100).unwrap();
        store.append_journal("f1", 200).unwrap();

        let restored = store.load_snapshot().unwrap();
        assert_eq!(restored.destination, inventory(&[("f1", 200)]));
        assert_eq!(restored.journal_applied, 2);
        assert_eq!(store.journal_len(), 2);
    }

    #[test]
    fn test_old_journal_removed_before_snapshot_replaced() {
        let (_dir, store) = store();
        store
            .save_snapshot(&Inventory::new(), &inventory(&[("a", 1)]))
            .unwrap();
        store.append_journal("stale", 5).unwrap();

        // 让重命名失败，模拟新快照落盘前中断
        fs::remove_file(store.snapshot_path()).unwrap();
        fs::create_dir_all(store.snapshot_path().join("blocker")).unwrap();

        assert!(store
            .save_snapshot(&inventory(&[("b", 2)]), &Inventory::new())
            .is_err());
        assert!(!store.dir().join(JOURNAL_FILE).exists());
    }

    #[test]
    fn test_new_snapshot_discards_journal() {
        let (_dir, store) = store();
        store.save_snapshot(&Inventory::new(), &Inventory::new()).unwrap();
        store.append_journal("stale", 1).unwrap();

        store.save_snapshot(&inventory(&[("x", 5)]), &Inventory::new()).unwrap();

        let restored = store.load_snapshot().unwrap();
        assert!(restored.destination.is_empty());
        assert_eq!(store.journal_len(), 0);
    }

    #[test]
    fn test_malformed_journal_lines_are_skipped() {
        let (_dir, store) = store();
        store.save_snapshot(&Inventory::new(), &Inventory::new()).unwrap();
        fs::write(
            store.dir().join(JOURNAL_FILE),
            "good::1\nno-separator\nbad::size\n::7\n\nalso good::2\n",
        )
        .unwrap();

        let restored = store.load_snapshot().unwrap();
        assert_eq!(
            restored.destination,
            inventory(&[("good", 1), ("also good", 2)])
        );
        assert_eq!(restored.journal_applied, 2);
        assert_eq!(restored.journal_skipped, 3);
    }

    #[test]
    fn test_corrupt_snapshot_is_not_a_checkpoint() {
        let (_dir, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join(SNAPSHOT_FILE), "{\"timestamp\": 1, \"sour").unwrap();

        assert!(store.has_checkpoint());
        assert!(store.load_snapshot().is_none());
    }

    #[test]
    fn test_journal_without_snapshot_is_not_a_checkpoint() {
        let (_dir, store) = store();
        store.append_journal("a", 1).unwrap();

        assert!(!store.has_checkpoint());
        assert!(store.load_snapshot().is_none());
        assert_eq!(store.age(), Duration::ZERO);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (_dir, store) = store();
        store.clear().unwrap();

        store.save_snapshot(&Inventory::new(), &Inventory::new()).unwrap();
        store.append_journal("a", 1).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();

        assert!(!store.has_checkpoint());
        assert_eq!(store.journal_len(), 0);
    }

    #[test]
    fn test_age_counts_from_snapshot_write() {
        let (_dir, store) = store();
        assert_eq!(store.age(), Duration::ZERO);

        store.save_snapshot(&Inventory::new(), &Inventory::new()).unwrap();
        assert!(store.age() < Duration::from_secs(60));
    }

    #[test]
    fn test_parse_journal_line() {
        assert_eq!(
            parse_journal_line("photos/2024::raw::4096").unwrap(),
            ("photos/2024::raw".to_string(), 4096)
        );
        assert_eq!(
            parse_journal_line("a.txt::0\r").unwrap(),
            ("a.txt".to_string(), 0)
        );
        assert!(parse_journal_line("a.txt").is_err());
        assert!(parse_journal_line("a.txt::-1").is_err());
        assert!(parse_journal_line("a.txt::").is_err());
    }

    #[test]
    fn test_names_with_line_breaks_are_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.append_journal("evil\nname", 1),
            Err(SyncError::JournalLineCorrupt { .. })
        ));
        assert_eq!(store.journal_len(), 0);
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(Duration::from_secs(5)), "5秒前");
        assert_eq!(format_age(Duration::from_secs(125)), "2分钟前");
        assert_eq!(format_age(Duration::from_secs(7200)), "2小时前");
        assert_eq!(format_age(Duration::from_secs(3 * 86400)), "3天前");
    }
}
