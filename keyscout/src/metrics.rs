use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::results::SkipReason;

/// Tracks per-request file processing counters.
///
/// Cloning shares the underlying counters, so every worker of a request
/// updates the same totals.
#[derive(Debug, Clone, Default)]
pub struct SearchMetrics {
    // Volume
    files_scanned: Arc<AtomicU64>,
    bytes_read: Arc<AtomicU64>,

    // Skips by reason
    permission_denied: Arc<AtomicU64>,
    decode_errors: Arc<AtomicU64>,
    pattern_timeouts: Arc<AtomicU64>,
    read_errors: Arc<AtomicU64>,

    lossy_decodes: Arc<AtomicU64>,
}

/// Point-in-time copy of [`SearchMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub files_scanned: u64,
    pub bytes_read: u64,
    pub permission_denied: u64,
    pub decode_errors: u64,
    pub pattern_timeouts: u64,
    pub read_errors: u64,
    pub lossy_decodes: u64,
}

impl MetricsSnapshot {
    pub fn files_skipped(&self) -> u64 {
        self.permission_denied + self.decode_errors + self.pattern_timeouts + self.read_errors
    }
}

impl SearchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a file whose occurrences were counted
    pub fn record_scanned(&self, bytes: u64) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
        let total = self.bytes_read.fetch_add(bytes, Ordering::Relaxed) + bytes;
        debug!("Scanned {} bytes, total: {} bytes", bytes, total);
    }

    /// Records a skipped file
    pub fn record_skip(&self, reason: SkipReason) {
        let counter = match reason {
            SkipReason::PermissionDenied => &self.permission_denied,
            SkipReason::DecodeError => &self.decode_errors,
            SkipReason::PatternTimeout => &self.pattern_timeouts,
            SkipReason::ReadError => &self.read_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records content that needed replacement characters to decode
    pub fn record_lossy_decode(&self) {
        self.lossy_decodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            permission_denied: self.permission_denied.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            pattern_timeouts: self.pattern_timeouts.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            lossy_decodes: self.lossy_decodes.load(Ordering::Relaxed),
        }
    }

    /// Logs current statistics
    pub fn log_stats(&self) {
        let stats = self.snapshot();
        info!(
            "Search stats:\n\
             Files scanned: {}\n\
             Bytes read: {}\n\
             Skipped: {} (permission denied {}, decode {}, timeout {}, read {})\n\
             Lossy decodes: {}",
            stats.files_scanned,
            stats.bytes_read,
            stats.files_skipped(),
            stats.permission_denied,
            stats.decode_errors,
            stats.pattern_timeouts,
            stats.read_errors,
            stats.lossy_decodes
        );
    }
}
