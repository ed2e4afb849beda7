use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the workflow, presenter and registry.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    // Upload lifecycle
    pub uploads_started: AtomicU64,
    pub uploads_completed: AtomicU64,
    pub uploads_failed: AtomicU64,
    pub uploads_cancelled: AtomicU64,
    pub status_syncs_failed: AtomicU64,

    // Image handles
    pub handles_registered: AtomicU64,
    pub handles_released: AtomicU64,

    // Read path
    pub fetches_started: AtomicU64,
    pub stale_results_discarded: AtomicU64,
    pub downloads_failed: AtomicU64,
    pub redirects_issued: AtomicU64,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads_started: self.uploads_started.load(Ordering::Relaxed),
            uploads_completed: self.uploads_completed.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            uploads_cancelled: self.uploads_cancelled.load(Ordering::Relaxed),
            status_syncs_failed: self.status_syncs_failed.load(Ordering::Relaxed),
            handles_registered: self.handles_registered.load(Ordering::Relaxed),
            handles_released: self.handles_released.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            stale_results_discarded: self.stale_results_discarded.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            redirects_issued: self.redirects_issued.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uploads_started: u64,
    pub uploads_completed: u64,
    pub uploads_failed: u64,
    pub uploads_cancelled: u64,
    pub status_syncs_failed: u64,
    pub handles_registered: u64,
    pub handles_released: u64,
    pub fetches_started: u64,
    pub stale_results_discarded: u64,
    pub downloads_failed: u64,
    pub redirects_issued: u64,
}

impl MetricsSnapshot {
    pub fn handles_live(&self) -> u64 {
        self.handles_registered.saturating_sub(self.handles_released)
    }
}
