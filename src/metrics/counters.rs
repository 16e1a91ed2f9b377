use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub bids_admitted: Arc<AtomicU64>,
    pub bids_rejected: Arc<AtomicU64>,

    pub rounds_settled: Arc<AtomicU64>,
    pub rounds_aborted: Arc<AtomicU64>,

    pub alarm_fired: Arc<AtomicU64>,
    pub alarm_noop: Arc<AtomicU64>,
}
