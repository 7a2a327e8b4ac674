pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{AppConfig, SyncSettings};
pub use core::{SyncConfig, SyncEngine, SyncReport, VerifyReport};
pub use error::{Result, SyncError};
