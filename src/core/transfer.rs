//! 单对象传输 - 源流直接写入目标，带进度与按大小伸缩的超时

use super::progress::{ProgressMeter, ProgressSink, TransferProgress, PROGRESS_INTERVAL};
use crate::config::SyncSettings;
use crate::error::{Result, SyncError};
use crate::storage::ObjectStore;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 传输超时 = max(下限, ceil(size / step) * per_step)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    floor: Duration,
    step_bytes: u64,
    per_step: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

impl TimeoutPolicy {
    pub fn new(floor: Duration, step_bytes: u64, per_step: Duration) -> Self {
        Self {
            floor,
            step_bytes: step_bytes.max(1),
            per_step,
        }
    }

    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.min_transfer_timeout_secs),
            settings.timeout_step_bytes,
            Duration::from_secs(settings.timeout_per_step_secs),
        )
    }

    pub fn for_size(&self, size: u64) -> Duration {
        let steps = size.div_ceil(self.step_bytes).min(u32::MAX as u64) as u32;
        self.per_step.saturating_mul(steps).max(self.floor)
    }
}

/// 一次成功传输的回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub name: String,
    /// 实际写入的字节数
    pub bytes: u64,
    pub elapsed: Duration,
}

/// 传输执行器
///
/// 存储句柄由调用方注入，同一个执行器可以反向使用（见 [`TransferExecutor::reversed`]）。
#[derive(Clone)]
pub struct TransferExecutor {
    source: Arc<dyn ObjectStore>,
    dest: Arc<dyn ObjectStore>,
    progress: Arc<dyn ProgressSink>,
    timeouts: TimeoutPolicy,
    progress_interval: Duration,
}

impl TransferExecutor {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        dest: Arc<dyn ObjectStore>,
        progress: Arc<dyn ProgressSink>,
        timeouts: TimeoutPolicy,
    ) -> Self {
        Self {
            source,
            dest,
            progress,
            timeouts,
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// 交换源与目标
    pub fn reversed(&self) -> Self {
        Self {
            source: self.dest.clone(),
            dest: self.source.clone(),
            ..self.clone()
        }
    }

    pub fn source(&self) -> &Arc<dyn ObjectStore> {
        &self.source
    }

    pub fn dest(&self) -> &Arc<dyn ObjectStore> {
        &self.dest
    }

    /// 传输一个对象，`expected` 为 0 时使用源端报告的长度
    ///
    /// 期限从打开源流开始计算，剩余时间交给目标端写入，超时由目标端负责清理。
    pub async fn transfer(&self, name: &str, expected: u64) -> Result<TransferReceipt> {
        let limit = self.timeouts.for_size(expected);
        self.pump(name, expected, limit).await.map_err(|e| match e {
            SyncError::Timeout { .. } => {
                SyncError::transfer(name, SyncError::Timeout { after: limit })
            }
            e => SyncError::transfer(name, e),
        })
    }

    async fn pump(&self, name: &str, expected: u64, limit: Duration) -> Result<TransferReceipt> {
        let started = Instant::now();
        let mut body = match tokio::time::timeout(limit, self.source.get_stream(name)).await {
            Ok(body) => body?,
            Err(_) => return Err(SyncError::Timeout { after: limit }),
        };
        let total = if expected > 0 {
            expected
        } else {
            body.content_length
        };

        debug!(
            "传输: {} ({} -> {}, {} 字节)",
            name,
            self.source.name(),
            self.dest.name(),
            total
        );
        self.progress.on_transfer_started(name, total);

        let sink = self.progress.clone();
        let mut meter = ProgressMeter::new(name, total, self.progress_interval);
        body.stream = body
            .stream
            .inspect_ok(move |chunk| {
                if let Some(event) = meter.advance(chunk.len() as u64) {
                    sink.on_progress(&event);
                }
            })
            .boxed();

        let remaining = limit.saturating_sub(started.elapsed());
        let written = self.dest.put_stream(name, body, remaining).await?;
        if total > 0 && written != total {
            warn!(
                "{} 写入 {} 字节，与预期的 {} 字节不一致",
                name, written, total
            );
        }

        let elapsed = started.elapsed();
        self.progress
            .on_progress(&TransferProgress::finished(name, written, total, elapsed));

        Ok(TransferReceipt {
            name: name.to_string(),
            bytes: written,
            elapsed,
        })
    }
}
