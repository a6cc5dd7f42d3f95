use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing document, collection and evaluation activity.
#[derive(Default)]
pub struct ServiceMetrics {
    documents_uploaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    transformations_completed: AtomicU64,
    transformations_failed: AtomicU64,
    collections_created: AtomicU64,
    collections_failed: AtomicU64,
    trace_syncs: AtomicU64,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stored upload and its size.
    pub fn record_upload(&self, size_bytes: u64) {
        self.documents_uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(size_bytes, Ordering::Relaxed);
    }

    /// Record the terminal state of a transformation job.
    pub fn record_transformation(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.transformations_completed
        } else {
            &self.transformations_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the terminal state of a collection creation job.
    pub fn record_collection(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.collections_created
        } else {
            &self.collections_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a trace-store fetch that refreshed an evaluation cache.
    pub fn record_trace_sync(&self) {
        self.trace_syncs.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_uploaded: self.documents_uploaded.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            transformations_completed: self.transformations_completed.load(Ordering::Relaxed),
            transformations_failed: self.transformations_failed.load(Ordering::Relaxed),
            collections_created: self.collections_created.load(Ordering::Relaxed),
            collections_failed: self.collections_failed.load(Ordering::Relaxed),
            trace_syncs: self.trace_syncs.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of service counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents accepted by the upload endpoint.
    pub documents_uploaded: u64,
    /// Total bytes accepted by the upload endpoint.
    pub bytes_uploaded: u64,
    /// Transformation jobs that produced an output document.
    pub transformations_completed: u64,
    /// Transformation jobs that ended in failure.
    pub transformations_failed: u64,
    /// Collection creation jobs that succeeded.
    pub collections_created: u64,
    /// Collection creation jobs that failed and were rolled back.
    pub collections_failed: u64,
    /// Successful refreshes of evaluation trace caches.
    pub trace_syncs: u64,
}
