//! 终端进度渲染，消费引擎发出的进度事件

use bucketsync_lib::core::{ObjectOutcome, ProgressEvent};
use humansize::{format_size, BINARY};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;

const TOTAL_TEMPLATE: &str =
    "Total:   [{bar:40.cyan/blue}] {percent:>3}% | {pos}/{len} 个对象 | ETA {eta} | {msg}";
const CURRENT_TEMPLATE: &str = "Current: [{bar:40.green/white}] {percent:>3}% | {msg}";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

struct Renderer {
    multi: MultiProgress,
    total: Option<ProgressBar>,
    current: Option<ProgressBar>,
}

impl Renderer {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            total: None,
            current: None,
        }
    }

    fn current(&mut self) -> &ProgressBar {
        self.current.get_or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(0));
            bar.set_style(style(CURRENT_TEMPLATE));
            bar
        })
    }

    fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { objects, bytes } => {
                let total = self.multi.add(ProgressBar::new(objects as u64));
                total.set_style(style(TOTAL_TEMPLATE));
                total.set_message(format!("待传输 {}", format_size(bytes, BINARY)));
                self.total = Some(total);
            }
            ProgressEvent::TransferStarted { name, total } => {
                let bar = self.current();
                bar.set_length(total.max(1));
                bar.set_position(0);
                bar.set_message(format!("{} | 0 B / {}", name, format_size(total, BINARY)));
            }
            ProgressEvent::Progress(progress) => {
                let bar = self.current();
                let speed = if progress.done {
                    "完成".to_string()
                } else {
                    format!("{}/s", format_size(progress.bytes_per_sec, BINARY))
                };
                bar.set_position(progress.transferred.min(progress.total.max(1)));
                bar.set_message(format!(
                    "{} | {} / {} | {}",
                    progress.name,
                    format_size(progress.transferred, BINARY),
                    format_size(progress.total, BINARY),
                    speed
                ));
            }
            ProgressEvent::ObjectDone { name, outcome } => {
                let status = match &outcome {
                    ObjectOutcome::Synced { .. } => format!("已同步: {}", name),
                    ObjectOutcome::Skipped => format!("已跳过: {}", name),
                    ObjectOutcome::Failed { error } => {
                        let _ = self.multi.println(format!("✗ {}: {}", name, error));
                        format!("失败: {}", name)
                    }
                };
                if let Some(total) = &self.total {
                    total.inc(1);
                    total.set_message(status);
                }
            }
            ProgressEvent::RunFinished(_) => self.finish(),
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.current.take() {
            bar.finish();
        }
        if let Some(bar) = self.total.take() {
            bar.finish();
        }
    }
}

/// 持续渲染直到发送端全部关闭
pub async fn render(mut rx: UnboundedReceiver<ProgressEvent>) {
    let mut renderer = Renderer::new();
    while let Some(event) = rx.recv().await {
        renderer.handle(event);
    }
    renderer.finish();
}
