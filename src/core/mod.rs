pub mod checkpoint;
pub mod engine;
pub mod inventory;
pub mod planner;
pub mod progress;
pub mod transfer;
pub mod verify;

pub use checkpoint::{CheckpointStore, RestoredCheckpoint};
pub use engine::{RunMode, SyncConfig, SyncEngine, SyncReport};
pub use inventory::{list_inventory, Inventory};
pub use planner::{plan, CopyReason, PlannedCopy, ReconcilePlan};
pub use progress::{ChannelProgress, NoopProgress, ObjectOutcome, ProgressEvent, ProgressSink};
pub use transfer::{TimeoutPolicy, TransferExecutor, TransferReceipt};
pub use verify::{VerifyReport, REPORT_LIMIT};
