//! The Store: an in-memory, per-source-bounded cache of telemetry
//! envelopes, plus the background prune cycle that keeps total memory use
//! under control.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log_cache_alloc::MemoryAnalyzer;
use log_cache_proto::Envelope;
use tokio::sync::Notify;

use crate::consultant::PruneConsultant;
use crate::filter::EnvelopeFilter;
use crate::heap::ExpirationHeap;
use crate::source::SourceStorage;

pub use crate::source::MAX_FUDGE;

/// Wall-clock duration of the last prune cycle, in nanoseconds. Published
/// by `Store::prune_once` and read by the node's `/metrics` handler
/// (§4.3 step 5: "prune-duration metrics").
pub static LAST_PRUNE_DURATION_NANOS: AtomicU64 = AtomicU64::new(0);

/// The node-local telemetry cache. Cheap to clone (wrap in `Arc`) since all
/// interior state is already behind atomics or a concurrent map.
pub struct Store {
    index: DashMap<String, Arc<SourceStorage>>,
    max_per_source: usize,
    total_count: AtomicU64,
    global_oldest_ts: AtomicI64,
    ingress_count: AtomicU64,
    egress_count: AtomicU64,
    last_prune_removed: AtomicBool,
    prune_done: Notify,
}

impl Store {
    pub fn new(max_per_source: usize) -> Self {
        Self {
            index: DashMap::new(),
            max_per_source,
            total_count: AtomicU64::new(0),
            global_oldest_ts: AtomicI64::new(0),
            ingress_count: AtomicU64::new(0),
            egress_count: AtomicU64::new(0),
            last_prune_removed: AtomicBool::new(false),
            prune_done: Notify::new(),
        }
    }

    pub fn put(&self, envelope: Envelope) {
        self.ingress_count.fetch_add(1, Ordering::Relaxed);
        let source_id = envelope.source_id.clone();
        let storage = self
            .index
            .entry(source_id)
            .or_insert_with(|| Arc::new(SourceStorage::new(self.max_per_source)))
            .clone();

        let outcome = storage.put(envelope);
        if !outcome.evicted {
            self.total_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(
        &self,
        source_id: &str,
        start: i64,
        end: i64,
        limit: usize,
        descending: bool,
        filter: &EnvelopeFilter,
    ) -> Vec<Arc<Envelope>> {
        let Some(storage) = self.index.get(source_id) else {
            return Vec::new();
        };
        let filtered = storage.get(start, end, limit, descending, filter);
        self.egress_count
            .fetch_add(filtered.len() as u64, Ordering::Relaxed);
        filtered
    }

    pub fn meta(&self) -> std::collections::HashMap<String, crate::source::SourceMeta> {
        self.index
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().meta()))
            .collect()
    }

    pub fn total_count(&self) -> u64 {
        self.total_count.load(Ordering::Relaxed)
    }

    pub fn global_oldest_ts(&self) -> i64 {
        self.global_oldest_ts.load(Ordering::Relaxed)
    }

    pub fn ingress_count(&self) -> u64 {
        self.ingress_count.load(Ordering::Relaxed)
    }

    pub fn egress_count(&self) -> u64 {
        self.egress_count.load(Ordering::Relaxed)
    }

    /// Blocks the calling task until the next prune cycle completes,
    /// returning `true` if that cycle removed any envelope. Used by tests
    /// that need a deterministic point after which eviction is guaranteed
    /// visible.
    pub async fn wait_for_truncation_to_complete(&self) -> bool {
        self.prune_done.notified().await;
        self.last_prune_removed.load(Ordering::Relaxed)
    }

    /// Runs a single prune cycle: asks `consultant` how many envelopes to
    /// remove given the current `analyzer` reading and store size, then
    /// evicts that many envelopes, oldest-globally-first. Returns `true` if
    /// anything was evicted.
    pub fn prune_once(
        &self,
        analyzer: &dyn MemoryAnalyzer,
        consultant: &dyn PruneConsultant,
    ) -> bool {
        let started = std::time::Instant::now();
        let store_count = self.index.len();
        let report = analyzer.report();
        let quantity = consultant.quantity_to_prune(report, store_count);

        if quantity == 0 {
            self.last_prune_removed.store(false, Ordering::Relaxed);
            LAST_PRUNE_DURATION_NANOS.store(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
            self.prune_done.notify_waiters();
            return false;
        }

        let mut heap = ExpirationHeap::new();
        for entry in self.index.iter() {
            let meta = entry.value().meta();
            if meta.count > 0 {
                heap.push(meta.oldest_ts, entry.key().clone());
            }
        }

        let mut removed = 0usize;
        while removed < quantity {
            let Some((_, source_id)) = heap.pop() else {
                break;
            };
            let Some(storage) = self.index.get(&source_id).map(|e| e.value().clone()) else {
                continue;
            };
            let remaining = storage.evict_oldest();
            self.total_count.fetch_sub(1, Ordering::Relaxed);
            removed += 1;

            if remaining == 0 {
                self.index.remove(&source_id);
            } else {
                let meta = storage.meta();
                heap.push(meta.oldest_ts, source_id);
            }
        }

        self.global_oldest_ts
            .store(heap.peek_oldest().unwrap_or(0), Ordering::Relaxed);
        self.last_prune_removed.store(removed > 0, Ordering::Relaxed);
        LAST_PRUNE_DURATION_NANOS.store(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.prune_done.notify_waiters();
        removed > 0
    }
}

/// Spawns the background prune loop, ticking every `interval`. The task
/// exits cleanly as soon as `shutdown` fires; callers must not observe
/// further prune activity or metric updates once it resolves.
pub fn spawn_pruner(
    store: Arc<Store>,
    analyzer: Arc<dyn MemoryAnalyzer>,
    consultant: Arc<dyn PruneConsultant>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    store.prune_once(analyzer.as_ref(), consultant.as_ref());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use log_cache_alloc::FixedMemoryAnalyzer;
    use log_cache_alloc::MemoryReport;
    use log_cache_proto::{Counter, Payload};

    fn counter(source_id: &str, ts: i64) -> Envelope {
        Envelope {
            source_id: source_id.to_string(),
            instance_id: None,
            timestamp: ts,
            tags: Default::default(),
            payload: Some(Payload::Counter(Counter {
                name: "n".to_string(),
                total: 1,
            })),
        }
    }

    #[test]
    fn put_and_get_roundtrip_across_sources() {
        let store = Store::new(100);
        store.put(counter("a", 1));
        store.put(counter("b", 1));

        let got = store.get("a", 0, i64::MAX, usize::MAX, false, &EnvelopeFilter::default());
        assert_eq!(got.len(), 1);
        assert_eq!(store.total_count(), 2);
    }

    #[test]
    fn get_on_unknown_source_is_empty() {
        let store = Store::new(100);
        let got = store.get("missing", 0, i64::MAX, usize::MAX, false, &EnvelopeFilter::default());
        assert!(got.is_empty());
    }

    #[test]
    fn prune_once_evicts_oldest_globally_first() {
        let store = Store::new(100);
        store.put(counter("a", 1));
        store.put(counter("b", 2));
        store.put(counter("a", 3));

        let analyzer = FixedMemoryAnalyzer(MemoryReport {
            heap_in_use: 0,
            system_available: 0,
            system_total: 0,
        });
        let consultant = crate::consultant::FixedPruneConsultant(2);

        let evicted = store.prune_once(&analyzer, &consultant);
        assert!(evicted);
        assert_eq!(store.total_count(), 1);

        let remaining_a = store.get("a", 0, i64::MAX, usize::MAX, false, &EnvelopeFilter::default());
        let remaining_b = store.get("b", 0, i64::MAX, usize::MAX, false, &EnvelopeFilter::default());
        assert_eq!(remaining_a.len() + remaining_b.len(), 1);
    }

    #[test]
    fn prune_once_with_zero_quantity_evicts_nothing() {
        let store = Store::new(100);
        store.put(counter("a", 1));

        let analyzer = FixedMemoryAnalyzer(MemoryReport {
            heap_in_use: 0,
            system_available: 0,
            system_total: 0,
        });
        let consultant = crate::consultant::FixedPruneConsultant(0);

        let evicted = store.prune_once(&analyzer, &consultant);
        assert!(!evicted);
        assert_eq!(store.total_count(), 1);
    }

    #[tokio::test]
    async fn wait_for_truncation_to_complete_resolves_after_prune() {
        let store = Arc::new(Store::new(100));
        store.put(counter("a", 1));

        let store_clone = store.clone();
        let waiter = tokio::spawn(async move { store_clone.wait_for_truncation_to_complete().await });

        // Give the waiter a chance to register before the notify fires.
        tokio::task::yield_now().await;

        let analyzer = FixedMemoryAnalyzer(MemoryReport {
            heap_in_use: 0,
            system_available: 0,
            system_total: 0,
        });
        let consultant = crate::consultant::FixedPruneConsultant(0);
        store.prune_once(&analyzer, &consultant);

        let removed = waiter.await.expect("waiter task panicked");
        assert!(!removed, "zero-quantity prune removes nothing");
    }

    #[tokio::test]
    async fn wait_for_truncation_to_complete_reports_true_when_envelopes_are_removed() {
        let store = Arc::new(Store::new(100));
        store.put(counter("a", 1));

        let store_clone = store.clone();
        let waiter = tokio::spawn(async move { store_clone.wait_for_truncation_to_complete().await });

        tokio::task::yield_now().await;

        let analyzer = FixedMemoryAnalyzer(MemoryReport {
            heap_in_use: 0,
            system_available: 0,
            system_total: 0,
        });
        let consultant = crate::consultant::FixedPruneConsultant(1);
        store.prune_once(&analyzer, &consultant);

        let removed = waiter.await.expect("waiter task panicked");
        assert!(removed);
    }
}
