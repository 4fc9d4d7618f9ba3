//! Sync status tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Snapshot reported by `SyncOrchestrator::status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    /// A remote write or drain pass is running.
    pub sync_in_progress: bool,
    /// Pending queue entries.
    pub queue_length: usize,
    /// Last confirmed remote write.
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

/// In-progress counter and last successful sync of one orchestrator.
#[derive(Debug, Default)]
pub struct SyncTracker {
    in_flight: AtomicUsize,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a remote operation as running until the guard drops.
    pub fn begin(&self) -> InProgressGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InProgressGuard(&self.in_flight)
    }

    pub fn in_progress(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    /// Record a confirmed remote write.
    pub fn record_sync(&self, at: DateTime<Utc>) {
        if let Ok(mut last) = self.last_sync.write() {
            *last = Some(last.map_or(at, |prev| prev.max(at)));
        }
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync.read().ok().and_then(|last| *last)
    }

    pub fn reset(&self) {
        if let Ok(mut last) = self.last_sync.write() {
            *last = None;
        }
    }
}

/// RAII guard decrementing the in-progress counter.
pub struct InProgressGuard<'a>(&'a AtomicUsize);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
