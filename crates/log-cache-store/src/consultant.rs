//! Prune consultant: a stateless mapping from memory pressure to a
//! quantity of envelopes to prune, modeled as a one-method interface so
//! tests can pin the number with a fixed double instead of real memory
//! stats.

use std::sync::atomic::{AtomicU64, Ordering};

use log_cache_alloc::MemoryReport;

/// Last-published `100 * heap / total` percentage, stored as `f64` bits so
/// it can live in an `AtomicU64`. Read by the node's `/metrics` handler.
pub static PERCENT_FULL_BITS: AtomicU64 = AtomicU64::new(0);

fn publish_percent(p: f64) {
    PERCENT_FULL_BITS.store(p.to_bits(), Ordering::Relaxed);
}

pub fn percent_full() -> f64 {
    f64::from_bits(PERCENT_FULL_BITS.load(Ordering::Relaxed))
}

pub trait PruneConsultant: Send + Sync {
    fn quantity_to_prune(&self, report: MemoryReport, store_count: usize) -> usize;
}

/// `p = 100 * heap / total`. If `p <= percent_to_fill`, prune nothing.
/// Otherwise prune `floor(store_count * (p - percent_to_fill) / p)`.
pub struct DefaultPruneConsultant {
    percent_to_fill: f64,
}

impl DefaultPruneConsultant {
    pub const DEFAULT_PERCENT_TO_FILL: f64 = 70.0;

    pub fn new(percent_to_fill: f64) -> Self {
        Self { percent_to_fill }
    }
}

impl Default for DefaultPruneConsultant {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PERCENT_TO_FILL)
    }
}

impl PruneConsultant for DefaultPruneConsultant {
    fn quantity_to_prune(&self, report: MemoryReport, store_count: usize) -> usize {
        if report.system_total == 0 {
            publish_percent(0.0);
            return 0;
        }
        let p = 100.0 * report.heap_in_use as f64 / report.system_total as f64;
        publish_percent(p);

        if p <= self.percent_to_fill {
            return 0;
        }
        ((store_count as f64) * (p - self.percent_to_fill) / p).floor() as usize
    }
}

/// Test double that always reports a pinned quantity.
pub struct FixedPruneConsultant(pub usize);

impl PruneConsultant for FixedPruneConsultant {
    fn quantity_to_prune(&self, _report: MemoryReport, _store_count: usize) -> usize {
        self.0
    }
}
