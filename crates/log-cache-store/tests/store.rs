use std::sync::Arc;

use log_cache_alloc::{FixedMemoryAnalyzer, MemoryReport};
use log_cache_proto::{Counter, Envelope, Payload};
use log_cache_store::{EnvelopeFilter, FixedPruneConsultant, Store};

fn counter(source_id: &str, ts: i64, name: &str) -> Envelope {
    Envelope {
        source_id: source_id.to_string(),
        instance_id: None,
        timestamp: ts,
        tags: Default::default(),
        payload: Some(Payload::Counter(Counter {
            name: name.to_string(),
            total: 1,
        })),
    }
}

#[test]
fn range_query_respects_fudge_group_boundary() {
    let store = Store::new(1000);
    // Three envelopes at the same real timestamp form one fudge group.
    store.put(counter("svc-a", 1, "n"));
    store.put(counter("svc-a", 1, "n"));
    store.put(counter("svc-a", 1, "n"));
    // One more at a later timestamp, outside the query window.
    store.put(counter("svc-a", 5, "n"));

    let got = store.get("svc-a", 0, 2, 2, false, &EnvelopeFilter::default());
    assert_eq!(got.len(), 3, "a limit cut must never split a fudge group");
}

#[test]
fn meta_reports_live_count_and_expired_after_capacity_eviction() {
    let store = Store::new(2);
    store.put(counter("svc-a", 1, "n"));
    store.put(counter("svc-a", 2, "n"));
    store.put(counter("svc-a", 3, "n"));

    let meta = store.meta();
    let svc_a = meta.get("svc-a").expect("svc-a present");
    assert_eq!(svc_a.count, 2);
    assert_eq!(svc_a.expired, 1);
    assert_eq!(svc_a.oldest_ts, 2);
    assert_eq!(svc_a.newest_ts, 3);
}

#[test]
fn name_filter_excludes_non_matching_counters_across_sources() {
    let store = Store::new(1000);
    store.put(counter("svc-a", 1, "cpu_usage"));
    store.put(counter("svc-a", 2, "mem_usage"));

    let filter = EnvelopeFilter::new(None, Some(regex::Regex::new("^cpu_.*$").unwrap()));
    let got = store.get("svc-a", 0, i64::MAX, usize::MAX, false, &filter);
    assert_eq!(got.len(), 1);
    match &got[0].payload {
        Some(Payload::Counter(c)) => assert_eq!(c.name, "cpu_usage"),
        _ => panic!("expected counter payload"),
    }
}

#[test]
fn prune_cycle_removes_globally_oldest_envelopes_first() {
    let store = Arc::new(Store::new(1000));
    store.put(counter("svc-a", 10, "n"));
    store.put(counter("svc-b", 20, "n"));
    store.put(counter("svc-a", 30, "n"));

    let analyzer = FixedMemoryAnalyzer(MemoryReport {
        heap_in_use: 71,
        system_available: 29,
        system_total: 100,
    });
    // DefaultPruneConsultant(70.0) over heap=71/total=100 and store_count=2
    // (two distinct sources) prunes floor(2 * 1/71) = 0, so pin the
    // quantity directly for a deterministic assertion instead.
    let consultant = FixedPruneConsultant(1);

    let evicted = store.prune_once(&analyzer, &consultant);
    assert!(evicted);
    assert_eq!(store.total_count(), 2);

    let svc_a_remaining = store.get("svc-a", 0, i64::MAX, usize::MAX, false, &EnvelopeFilter::default());
    // svc-a's timestamp-10 envelope was globally oldest and should be gone.
    assert!(svc_a_remaining.iter().all(|e| e.timestamp != 10));
}
