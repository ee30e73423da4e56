pub mod manager;

pub use manager::{SourceStatus, SyncManager, SyncReport, SyncStats, SyncStatus, DEFAULT_SYNC_INTERVAL};
