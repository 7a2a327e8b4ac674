//! 同步引擎 - 驱动完整同步、单对象同步、校验与反向复制

use super::checkpoint::CheckpointStore;
use super::inventory::{list_inventory, Inventory};
use super::planner::{self, classify, Decision};
use super::progress::{ObjectOutcome, ProgressSink};
use super::transfer::{TimeoutPolicy, TransferExecutor, TransferReceipt};
use super::verify::{compare_inventories, content_digest, VerifyReport};
use crate::config::{AppConfig, SyncSettings};
use crate::error::{Result, SyncError};
use crate::storage::{create_store, ObjectStore};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 最大并发传输数，1 表示顺序传输
    pub max_concurrent_transfers: usize,
    /// 单次运行内的最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    pub retry_base_delay_ms: u64,
    pub list_page_size: usize,
    pub timeouts: TimeoutPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SyncConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            max_concurrent_transfers: settings.max_concurrent_transfers.max(1),
            max_retries: settings.max_retries,
            retry_base_delay_ms: settings.retry_base_delay_ms,
            list_page_size: settings.list_page_size.max(1),
            timeouts: TimeoutPolicy::from_settings(settings),
        }
    }
}

/// 运行类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Full,
    Single,
    Copyback,
}

/// 同步报告
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub run_id: String,
    pub mode: RunMode,
    pub start_time: i64,
    pub end_time: i64,
    /// 是否从检查点恢复
    pub resumed: bool,
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_transferred: u64,
    /// 目标端独有的对象数
    pub extra: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl SyncReport {
    fn new(mode: RunMode) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            mode,
            start_time: chrono::Utc::now().timestamp(),
            end_time: 0,
            resumed: false,
            synced: 0,
            skipped: 0,
            failed: 0,
            bytes_transferred: 0,
            extra: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    fn record_success(&mut self, receipt: &TransferReceipt) {
        self.synced += 1;
        self.bytes_transferred += receipt.bytes;
    }

    fn record_failure(&mut self, error: &SyncError) {
        self.failed += 1;
        self.errors.push(error.to_string());
    }

    fn finish(&mut self, started: Instant) {
        self.end_time = chrono::Utc::now().timestamp();
        self.duration = started.elapsed();
    }
}

/// 同步引擎
///
/// 存储句柄在构造时注入，检查点目录由本实例独占。
pub struct SyncEngine {
    executor: TransferExecutor,
    checkpoint: CheckpointStore,
    config: SyncConfig,
    progress: Arc<dyn ProgressSink>,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        dest: Arc<dyn ObjectStore>,
        checkpoint: CheckpointStore,
        config: SyncConfig,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let executor = TransferExecutor::new(source, dest, progress.clone(), config.timeouts);
        Self {
            executor,
            checkpoint,
            config,
            progress,
        }
    }

    /// 按应用配置创建两端存储
    pub fn connect(
        config: &AppConfig,
        work_dir: &Path,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        let read_chunk = config.settings.read_chunk_bytes;
        let source = create_store(&config.source, read_chunk)?;
        let dest = create_store(&config.destination, read_chunk)?;
        let checkpoint = CheckpointStore::new(config.settings.checkpoint_path(work_dir));
        Ok(Self::new(
            source,
            dest,
            checkpoint,
            SyncConfig::from(&config.settings),
            progress,
        ))
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    fn source(&self) -> &dyn ObjectStore {
        self.executor.source().as_ref()
    }

    fn dest(&self) -> &dyn ObjectStore {
        self.executor.dest().as_ref()
    }

    /// 同时列举两端
    async fn list_both(&self) -> Result<(Inventory, Inventory)> {
        let page_size = self.config.list_page_size;
        tokio::try_join!(
            list_inventory(self.source(), page_size),
            list_inventory(self.dest(), page_size)
        )
    }

    /// 完整同步
    ///
    /// 有检查点时直接恢复清单，否则重新列举并先写快照再开始传输。
    /// 只有列举失败会返回错误，单个对象的失败计入报告。
    pub async fn run_sync(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::new(RunMode::Full);
        info!(
            "开始同步 [{}]: {} -> {}",
            report.run_id,
            self.source().name(),
            self.dest().name()
        );

        let (source, mut destination) = match self.checkpoint.load_snapshot() {
            Some(restored) => {
                info!(
                    "从检查点恢复 ({})，日志回放 {} 个已完成对象",
                    super::checkpoint::format_age(self.checkpoint.age()),
                    restored.journal_applied
                );
                report.resumed = true;
                (restored.source, restored.destination)
            }
            None => {
                info!("获取对象列表...");
                let (source, destination) = self.list_both().await?;
                if let Err(e) = self.checkpoint.save_snapshot(&source, &destination) {
                    warn!("保存检查点失败，本次运行无法断点续传: {}", e);
                }
                (source, destination)
            }
        };
        info!(
            "源端 {} 个对象, 目标端 {} 个对象",
            source.len(),
            destination.len()
        );

        let plan = planner::plan(&source, &destination);
        let summary = plan.summary();
        report.skipped = plan.skipped;
        report.extra = plan.extra.len();
        info!(
            "对账完成: 缺失 {}, 大小不同 {}, 跳过 {}, 目标端多余 {}",
            summary.missing_count, summary.mismatch_count, summary.skip_count, summary.extra_count
        );
        self.progress
            .on_run_started(plan.copy_set.len(), summary.copy_bytes);

        let executor = &self.executor;
        let mut results = futures::stream::iter(plan.copy_set.iter())
            .map(|planned| async move {
                let result = self
                    .transfer_with_retry(executor, &planned.name, planned.size)
                    .await;
                (planned, result)
            })
            .buffer_unordered(self.config.max_concurrent_transfers.max(1));

        // 日志追加与清单更新都在传输成功之后
        while let Some((planned, result)) = results.next().await {
            match result {
                Ok(receipt) => {
                    if let Err(e) = self.checkpoint.append_journal(&planned.name, receipt.bytes) {
                        warn!("写入完成日志失败: {}: {}", planned.name, e);
                    }
                    destination.insert(planned.name.clone(), receipt.bytes);
                    report.record_success(&receipt);
                    self.progress.on_object_done(
                        &planned.name,
                        &ObjectOutcome::Synced {
                            bytes: receipt.bytes,
                        },
                    );
                }
                Err(e) => {
                    report.record_failure(&e);
                    self.progress.on_object_done(
                        &planned.name,
                        &ObjectOutcome::Failed {
                            error: e.to_string(),
                        },
                    );
                }
            }
        }

        if report.is_clean() {
            if let Err(e) = self.checkpoint.clear() {
                warn!("清除检查点失败: {}", e);
            }
        } else {
            let remaining = planner::plan(&source, &destination).copy_set.len();
            warn!(
                "同步结束，{} 个对象失败，保留检查点以便重试 (剩余 {} 个)",
                report.failed, remaining
            );
        }

        report.finish(started);
        info!(
            "同步完成: 成功 {}, 跳过 {}, 失败 {}, 耗时 {:?}",
            report.synced, report.skipped, report.failed, report.duration
        );
        self.progress.on_run_finished(&report);
        Ok(report)
    }

    /// 单对象同步，不读写检查点
    pub async fn sync_single(&self, name: &str) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::new(RunMode::Single);
        info!("开始单对象同步: {}", name);

        let source_size = match self.source().head_size(name).await {
            Ok(Some(size)) => size,
            Ok(None) => {
                let e = SyncError::ObjectNotFound {
                    store: self.source().name().to_string(),
                    name: name.to_string(),
                };
                error!("无法访问源对象: {}", e);
                return Ok(self.single_failed(report, name, e, started));
            }
            Err(e) => {
                error!("无法访问源对象 {}: {}", name, e);
                return Ok(self.single_failed(report, name, e, started));
            }
        };

        let dest_size = match self.dest().head_size(name).await {
            Ok(size) => size,
            Err(e) => {
                warn!("无法获取目标端大小 {}: {}", name, e);
                None
            }
        };

        match classify(source_size, dest_size) {
            Decision::Skip => {
                info!("跳过: {} (已是最新)", name);
                report.skipped = 1;
                self.progress.on_object_done(name, &ObjectOutcome::Skipped);
            }
            Decision::Copy(reason) => {
                debug!("{} 需要复制: {:?}", name, reason);
                self.progress.on_run_started(1, source_size);
                // 单对象模式只调用一次传输，不重试
                match self.executor.transfer(name, source_size).await {
                    Ok(receipt) => {
                        report.record_success(&receipt);
                        self.progress.on_object_done(
                            name,
                            &ObjectOutcome::Synced {
                                bytes: receipt.bytes,
                            },
                        );
                    }
                    Err(e) => return Ok(self.single_failed(report, name, e, started)),
                }
            }
        }

        report.finish(started);
        self.progress.on_run_finished(&report);
        Ok(report)
    }

    fn single_failed(
        &self,
        mut report: SyncReport,
        name: &str,
        error: SyncError,
        started: Instant,
    ) -> SyncReport {
        report.record_failure(&error);
        self.progress.on_object_done(
            name,
            &ObjectOutcome::Failed {
                error: error.to_string(),
            },
        );
        report.finish(started);
        self.progress.on_run_finished(&report);
        report
    }

    /// 把目标端的对象复制回源端
    ///
    /// 目标端没有该对象或复制失败都返回错误。
    pub async fn copyback(&self, name: &str) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::new(RunMode::Copyback);
        let executor = self.executor.reversed();

        let size = executor
            .source()
            .head_size(name)
            .await?
            .ok_or_else(|| SyncError::ObjectNotFound {
                store: executor.source().name().to_string(),
                name: name.to_string(),
            })?;
        info!(
            "反向复制: {} ({} -> {}, {} 字节)",
            name,
            executor.source().name(),
            executor.dest().name(),
            size
        );

        self.progress.on_run_started(1, size);
        let receipt = self.transfer_with_retry(&executor, name, size).await?;
        report.record_success(&receipt);
        self.progress.on_object_done(
            name,
            &ObjectOutcome::Synced {
                bytes: receipt.bytes,
            },
        );

        report.finish(started);
        self.progress.on_run_finished(&report);
        Ok(report)
    }

    /// 重新列举两端并比较，不使用检查点
    ///
    /// `deep` 时对大小相同的对象逐一计算内容摘要。
    pub async fn verify(&self, deep: bool) -> Result<VerifyReport> {
        info!("开始校验...");
        let (source, destination) = self.list_both().await?;
        let mut report = compare_inventories(&source, &destination);
        info!(
            "源端 {} 个对象, 目标端 {} 个对象",
            report.source_count, report.dest_count
        );

        if deep {
            let candidates: Vec<&String> = source
                .iter()
                .filter(|(name, size)| destination.get(*name) == Some(*size))
                .map(|(name, _)| name)
                .collect();
            info!("深度校验 {} 个对象", candidates.len());

            let mut digests = futures::stream::iter(candidates)
                .map(|name| async move {
                    let matched = tokio::try_join!(
                        content_digest(self.source(), name),
                        content_digest(self.dest(), name)
                    )
                    .map(|(a, b)| a == b);
                    (name, matched)
                })
                .buffer_unordered(self.config.max_concurrent_transfers.max(1));

            while let Some((name, matched)) = digests.next().await {
                report.digested += 1;
                match matched {
                    Ok(true) => {}
                    Ok(false) => report.content_mismatch.push(name.clone()),
                    Err(e) => {
                        warn!("无法比对 {}: {}", name, e);
                        report.content_mismatch.push(name.clone());
                    }
                }
            }
            report.content_mismatch.sort();
        }

        if report.passed() {
            info!("校验通过");
        } else {
            warn!(
                "校验失败: 缺失 {}, 大小不同 {}, 内容不同 {}",
                report.missing.len(),
                report.size_mismatch.len(),
                report.content_mismatch.len()
            );
        }
        Ok(report)
    }

    /// 带重试的传输，对象不存在时不重试
    async fn transfer_with_retry(
        &self,
        executor: &TransferExecutor,
        name: &str,
        size: u64,
    ) -> Result<TransferReceipt> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0u32;

        loop {
            match executor.transfer(name, size).await {
                Ok(receipt) => {
                    debug!(
                        "已同步: {} ({} 字节, {:?})",
                        name, receipt.bytes, receipt.elapsed
                    );
                    return Ok(receipt);
                }
                Err(e) if e.is_not_found() || attempt >= max_retries => {
                    error!("同步失败 {} (已重试{}次): {}", name, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    // 指数退避
                    let delay = self
                        .config
                        .retry_base_delay_ms
                        .saturating_mul(1u64 << attempt.min(16));
                    warn!(
                        "传输失败，{}ms 后重试 ({}/{}): {}",
                        delay,
                        attempt + 1,
                        max_retries,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }
}
