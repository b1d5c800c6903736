//! Memory analyzer: reports heap-in-use and system memory, and updates
//! three gauges on every call. Heap figures come from jemalloc (epoch
//! advance + `jemalloc_ctl::stats` readers); system-wide totals come from
//! `sysinfo`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

/// `(heap_in_use, system_available, system_total)`, all in bytes, per §4.1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryReport {
    pub heap_in_use: u64,
    pub system_available: u64,
    pub system_total: u64,
}

/// A pluggable source of memory pressure figures.
pub trait MemoryAnalyzer: Send + Sync {
    fn report(&self) -> MemoryReport;
}

/// Gauges last published by any `MemoryAnalyzer::report` call. Read by the
/// node's `/metrics` handler.
pub static HEAP_IN_USE_BYTES: AtomicU64 = AtomicU64::new(0);
pub static SYSTEM_AVAILABLE_BYTES: AtomicU64 = AtomicU64::new(0);
pub static SYSTEM_TOTAL_BYTES: AtomicU64 = AtomicU64::new(0);

fn publish(report: MemoryReport) {
    HEAP_IN_USE_BYTES.store(report.heap_in_use, Ordering::Relaxed);
    SYSTEM_AVAILABLE_BYTES.store(report.system_available, Ordering::Relaxed);
    SYSTEM_TOTAL_BYTES.store(report.system_total, Ordering::Relaxed);
}

/// Reports heap-in-use via jemalloc, and system available/total via
/// `sysinfo`. Thread-safe: the `sysinfo::System` refresh is the only
/// stateful part and is guarded by a mutex.
pub struct JemallocMemoryAnalyzer {
    epoch: jemalloc_ctl::epoch_mib,
    allocated: jemalloc_ctl::stats::allocated_mib,
    system: Mutex<sysinfo::System>,
}

impl JemallocMemoryAnalyzer {
    pub fn new() -> Result<Self, jemalloc_ctl::Error> {
        Ok(Self {
            epoch: jemalloc_ctl::epoch::mib()?,
            allocated: jemalloc_ctl::stats::allocated::mib()?,
            system: Mutex::new(sysinfo::System::new()),
        })
    }
}

impl MemoryAnalyzer for JemallocMemoryAnalyzer {
    fn report(&self) -> MemoryReport {
        // Advance jemalloc's epoch so the cached stats below aren't stale.
        let _ = self.epoch.advance();
        let heap_in_use = self.allocated.read().unwrap_or(0) as u64;

        let mut system = self.system.lock().expect("sysinfo lock poisoned");
        system.refresh_memory();

        let report = MemoryReport {
            heap_in_use,
            system_available: system.available_memory(),
            system_total: system.total_memory(),
        };
        publish(report);
        report
    }
}

/// Wraps another analyzer but overrides `system_total` with a fixed value,
/// used to cap total memory regardless of host and in tests.
pub struct StaticMemoryAnalyzer<A> {
    inner: A,
    system_total: u64,
}

impl<A: MemoryAnalyzer> StaticMemoryAnalyzer<A> {
    pub fn new(inner: A, system_total: u64) -> Self {
        Self {
            inner,
            system_total,
        }
    }
}

impl<A: MemoryAnalyzer> MemoryAnalyzer for StaticMemoryAnalyzer<A> {
    fn report(&self) -> MemoryReport {
        let mut report = self.inner.report();
        report.system_total = self.system_total;
        publish(report);
        report
    }
}

/// A fixed-value analyzer useful for deterministic tests.
pub struct FixedMemoryAnalyzer(pub MemoryReport);

impl MemoryAnalyzer for FixedMemoryAnalyzer {
    fn report(&self) -> MemoryReport {
        publish(self.0);
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_analyzer_overrides_total_only() {
        let fixed = FixedMemoryAnalyzer(MemoryReport {
            heap_in_use: 71,
            system_available: 10,
            system_total: 1000,
        });
        let capped = StaticMemoryAnalyzer::new(fixed, 100);
        let report = capped.report();
        assert_eq!(report.heap_in_use, 71);
        assert_eq!(report.system_total, 100);
    }
}
