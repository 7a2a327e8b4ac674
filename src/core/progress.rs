//! 进度上报
//!
//! 核心逻辑只调用 `ProgressSink`，渲染由接收方自行处理，调用不能阻塞传输。

use super::engine::SyncReport;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// 两次进度事件的最小间隔
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// 单个对象的传输进度
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub name: String,
    pub transferred: u64,
    /// 为 0 表示未知
    pub total: u64,
    pub bytes_per_sec: u64,
    /// 传输完成时的最后一次事件
    pub done: bool,
}

impl TransferProgress {
    /// 传输结束时的事件，速度取整个传输的平均值
    pub fn finished(name: impl Into<String>, transferred: u64, total: u64, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            transferred,
            total,
            bytes_per_sec: rate(transferred, elapsed),
            done: true,
        }
    }
}

/// 单个对象的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOutcome {
    Synced { bytes: u64 },
    Skipped,
    Failed { error: String },
}

/// 进度接收方，所有方法默认忽略
pub trait ProgressSink: Send + Sync {
    fn on_run_started(&self, _objects: usize, _bytes: u64) {}

    fn on_transfer_started(&self, _name: &str, _total: u64) {}

    fn on_progress(&self, _progress: &TransferProgress) {}

    fn on_object_done(&self, _name: &str, _outcome: &ObjectOutcome) {}

    fn on_run_finished(&self, _report: &SyncReport) {}
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {}

/// 通过通道转发的进度事件
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    RunStarted { objects: usize, bytes: u64 },
    TransferStarted { name: String, total: u64 },
    Progress(TransferProgress),
    ObjectDone { name: String, outcome: ObjectOutcome },
    RunFinished(SyncReport),
}

/// 把事件发到无界通道，接收方关闭后静默丢弃
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl ProgressSink for ChannelProgress {
    fn on_run_started(&self, objects: usize, bytes: u64) {
        self.send(ProgressEvent::RunStarted { objects, bytes });
    }

    fn on_transfer_started(&self, name: &str, total: u64) {
        self.send(ProgressEvent::TransferStarted {
            name: name.to_string(),
            total,
        });
    }

    fn on_progress(&self, progress: &TransferProgress) {
        self.send(ProgressEvent::Progress(progress.clone()));
    }

    fn on_object_done(&self, name: &str, outcome: &ObjectOutcome) {
        self.send(ProgressEvent::ObjectDone {
            name: name.to_string(),
            outcome: outcome.clone(),
        });
    }

    fn on_run_finished(&self, report: &SyncReport) {
        self.send(ProgressEvent::RunFinished(report.clone()));
    }
}

/// 字节计数 + 节流
pub struct ProgressMeter {
    name: String,
    total: u64,
    transferred: u64,
    interval: Duration,
    last_emit: Instant,
    last_bytes: u64,
}

impl ProgressMeter {
    pub fn new(name: impl Into<String>, total: u64, interval: Duration) -> Self {
        Self {
            name: name.into(),
            total,
            transferred: 0,
            interval,
            last_emit: Instant::now(),
            last_bytes: 0,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// 累加字节数，距上次事件超过间隔时返回新事件
    pub fn advance(&mut self, bytes: u64) -> Option<TransferProgress> {
        self.transferred += bytes;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_emit);
        if elapsed < self.interval {
            return None;
        }

        let speed = rate(self.transferred - self.last_bytes, elapsed);
        self.last_emit = now;
        self.last_bytes = self.transferred;
        Some(TransferProgress {
            name: self.name.clone(),
            transferred: self.transferred,
            total: self.total,
            bytes_per_sec: speed,
            done: false,
        })
    }
}

fn rate(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_throttles_events() {
        let mut meter = ProgressMeter::new("big.bin", 1000, Duration::from_secs(60));
        for _ in 0..10 {
            assert!(meter.advance(100).is_none());
        }
        assert_eq!(meter.transferred(), 1000);

        let last = TransferProgress::finished("big.bin", 1000, 1000, Duration::from_secs(2));
        assert!(last.done);
        assert_eq!(last.bytes_per_sec, 500);
    }

    #[test]
    fn test_meter_emits_after_interval() {
        let mut meter = ProgressMeter::new("a", 0, Duration::ZERO);
        let event = meter.advance(42).unwrap();
        assert_eq!(event.transferred, 42);
        assert_eq!(event.total, 0);
        assert!(!event.done);
    }

    #[tokio::test]
    async fn test_channel_progress_forwards_events() {
        let (sink, mut rx) = ChannelProgress::new();
        sink.on_transfer_started("a", 10);
        sink.on_object_done("a", &ObjectOutcome::Synced { bytes: 10 });

        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::TransferStarted { total: 10, .. })
        ));
        match rx.recv().await {
            Some(ProgressEvent::ObjectDone { name, outcome }) => {
                assert_eq!(name, "a");
                assert_eq!(outcome, ObjectOutcome::Synced { bytes: 10 });
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_closed_channel_does_not_panic() {
        let (sink, rx) = ChannelProgress::new();
        drop(rx);
        sink.on_run_started(3, 60);
    }
}
