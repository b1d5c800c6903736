//! Per-source storage: a bounded, time-ordered sequence of envelopes for a
//! single `source_id`, keyed by `(timestamp, δ)` to avoid collisions
//! between envelopes that share a timestamp (possibly from different
//! producers).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log_cache_proto::Envelope;

use crate::filter::EnvelopeFilter;

/// Upper bound (exclusive) on the collision-avoidance offset δ. Exhausting
/// it for one real timestamp is logged, not panicked, and the last
/// candidate slot is overwritten.
pub const MAX_FUDGE: i64 = 4000;

/// The internal sequence key: `(timestamp, δ)`, ordered lexicographically
/// so it sorts identically to `timestamp + δ` while keeping δ scoped to
/// its own real timestamp. A flat `timestamp + δ` integer would let a
/// collision chain for one timestamp bleed into the key range of the
/// next distinct timestamp (e.g. probing `ts=0`'s δ into the slot `1`
/// that "belongs" to `ts=1`), which can reorder envelopes that arrived
/// with different real timestamps. Keying on the tuple keeps ordering a
/// pure function of `(timestamp, δ)` regardless of insertion order.
type SeqKey = (i64, i64);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SourceMeta {
    pub count: u64,
    pub expired: u64,
    pub oldest_ts: i64,
    pub newest_ts: i64,
}

pub struct SourceStorage {
    entries: RwLock<BTreeMap<SeqKey, Arc<Envelope>>>,
    expired: AtomicU64,
    max_per_source: usize,
}

pub struct PutOutcome {
    pub evicted: bool,
}

impl SourceStorage {
    pub fn new(max_per_source: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            expired: AtomicU64::new(0),
            max_per_source,
        }
    }

    /// Finds the smallest δ ∈ [0, MAX_FUDGE) such that `(ts, δ)` is unused.
    fn fudge_key(entries: &BTreeMap<SeqKey, Arc<Envelope>>, ts: i64) -> SeqKey {
        let mut delta = 0i64;
        while delta < MAX_FUDGE && entries.contains_key(&(ts, delta)) {
            delta += 1;
        }
        if delta >= MAX_FUDGE {
            debug_assert!(false, "MAX_FUDGE exhausted for timestamp {ts}");
            tracing::error!(timestamp = ts, "MAX_FUDGE exhausted for timestamp; overwriting");
            delta = MAX_FUDGE - 1;
        }
        (ts, delta)
    }

    pub fn put(&self, envelope: Envelope) -> PutOutcome {
        let mut entries = self.entries.write().expect("source storage lock poisoned");
        let key = Self::fudge_key(&entries, envelope.timestamp);
        entries.insert(key, Arc::new(envelope));

        let mut evicted = false;
        if entries.len() > self.max_per_source {
            if let Some(&oldest_key) = entries.keys().next() {
                entries.remove(&oldest_key);
            }
            evicted = true;
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
        PutOutcome { evicted }
    }

    pub fn meta(&self) -> SourceMeta {
        let entries = self.entries.read().expect("source storage lock poisoned");
        SourceMeta {
            count: entries.len() as u64,
            expired: self.expired.load(Ordering::Relaxed),
            oldest_ts: entries.values().next().map(|e| e.timestamp).unwrap_or(0),
            newest_ts: entries.values().next_back().map(|e| e.timestamp).unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .read()
            .expect("source storage lock poisoned")
            .is_empty()
    }

    /// Evicts this source's oldest envelope (used by the pruner). Returns
    /// the number of envelopes remaining afterward.
    pub fn evict_oldest(&self) -> usize {
        let mut entries = self.entries.write().expect("source storage lock poisoned");
        if let Some(&oldest_key) = entries.keys().next() {
            entries.remove(&oldest_key);
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
        entries.len()
    }

    /// Range scan honoring timestamp boundaries `[start, end)`, ordered
    /// ascending or descending by internal key, never splitting a fudge
    /// group (a maximal run of consecutive *matching* entries sharing a
    /// real timestamp) at the `limit` cut-off. `filter` is applied inside
    /// the traversal so `limit` bounds the matched result, not the raw
    /// scan — an envelope the filter excludes is skipped without counting
    /// against `limit` or against the fudge-group boundary.
    pub fn get(
        &self,
        start: i64,
        end: i64,
        limit: usize,
        descending: bool,
        filter: &EnvelopeFilter,
    ) -> Vec<Arc<Envelope>> {
        let entries = self.entries.read().expect("source storage lock poisoned");
        let mut out = Vec::new();
        let mut last_ts: Option<i64> = None;

        if !descending {
            for (_, envelope) in entries.range((start, 0)..) {
                let ts = envelope.timestamp;
                if ts >= end {
                    break;
                }
                if ts < start {
                    continue;
                }
                let Some(matched) = filter.apply(envelope) else {
                    continue;
                };
                if out.len() >= limit && last_ts != Some(ts) {
                    break;
                }
                last_ts = Some(ts);
                out.push(matched);
            }
        } else {
            for (_, envelope) in entries.range(..(end, 0)).rev() {
                let ts = envelope.timestamp;
                if ts >= end {
                    continue;
                }
                if ts < start {
                    break;
                }
                let Some(matched) = filter.apply(envelope) else {
                    continue;
                };
                if out.len() >= limit && last_ts != Some(ts) {
                    break;
                }
                last_ts = Some(ts);
                out.push(matched);
            }
        }
        out
    }
}
