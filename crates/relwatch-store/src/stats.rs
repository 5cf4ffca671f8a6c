//! Store activity counters.

use chrono::{DateTime, Utc};

/// A snapshot of file-store activity, maintained under its own lock so
/// bookkeeping never contends with record I/O.
#[derive(Debug, Clone, Default)]
pub struct StoreStatistics {
    /// Completed read operations.
    pub reads: u64,
    /// Completed write operations.
    pub writes: u64,
    /// Size of the store file in bytes after the last write.
    pub file_size: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_request: Option<DateTime<Utc>>,
    /// Artifacts in the store as of the last read or write.
    pub artifact_count: usize,
    /// Version entries across all artifacts as of the last read or write.
    pub version_count: usize,
}
