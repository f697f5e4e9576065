//! Per-worker scheduler counters.
//!
//! Hot-path updates are plain integer ops on a worker-local struct; nothing
//! is shared while the pool runs. Aggregation into a [`MetricsSnapshot`]
//! happens once, when the workers are joined at shutdown.

/// Counters owned by a single worker. No atomics: each worker updates its
/// own instance and hands it back when its thread exits.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkerMetrics {
    /// Jobs claimed from a ready queue (includes async resumptions).
    pub jobs_claimed: u64,
    /// Jobs driven to DONE.
    pub jobs_completed: u64,
    /// Cooperative yields (each one re-enqueues the job).
    pub yields: u64,
    /// Trigger awaits, whether parked or completed synchronously.
    pub awaits: u64,
    /// Times the worker parked with an empty claim order.
    pub parks: u64,
}

/// Pool-wide totals, merged after all workers have exited.
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub yields: u64,
    pub awaits: u64,
    pub parks: u64,
    /// Worker count the pool ran with.
    pub workers: usize,
}

impl MetricsSnapshot {
    pub(crate) fn merge_worker(&mut self, m: &WorkerMetrics) {
        self.jobs_claimed += m.jobs_claimed;
        self.jobs_completed += m.jobs_completed;
        self.yields += m.yields;
        self.awaits += m.awaits;
        self.parks += m.parks;
    }
}
