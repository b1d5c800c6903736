//! Hand-rolled Prometheus text exposition for the node's `/metrics`
//! endpoint. Modeled on the teacher's `define_metrics!` registry
//! (`crates/agent/src/api/public/open_metrics.rs`): each metric declares
//! its name, help text and type once, and is rendered in one pass over the
//! process-wide gauges/counters the rest of the workspace publishes.
//!
//! This is a fixed, per-process metric set (no per-label cardinality, since
//! the node holds no per-request histograms) so the teacher's chunked
//! `BufferParts` buffering isn't needed — one `String` is enough.

use std::fmt::Write as _;
use std::sync::atomic::Ordering;

use crate::state::AppState;

struct Metric {
    name: &'static str,
    help: &'static str,
    type_: &'static str,
}

const COUNTER: &str = "counter";
const GAUGE: &str = "gauge";

fn emit(buf: &mut String, metric: &Metric, value: f64) {
    let _ = writeln!(buf, "# HELP {} {}", metric.name, metric.help);
    let _ = writeln!(buf, "# TYPE {} {}", metric.name, metric.type_);
    let _ = writeln!(buf, "{} {}", metric.name, value);
}

const HEAP_IN_USE_BYTES: Metric = Metric {
    name: "log_cache_heap_in_use_bytes",
    help: "Heap bytes in use as last reported by the memory analyzer",
    type_: GAUGE,
};
const SYSTEM_AVAILABLE_BYTES: Metric = Metric {
    name: "log_cache_system_available_bytes",
    help: "System memory available as last reported by the memory analyzer",
    type_: GAUGE,
};
const SYSTEM_TOTAL_BYTES: Metric = Metric {
    name: "log_cache_system_total_bytes",
    help: "System memory total (or the configured override) as last reported by the memory analyzer",
    type_: GAUGE,
};
const PERCENT_FULL: Metric = Metric {
    name: "log_cache_percent_full",
    help: "100 * heap_in_use / system_total, as last published by the prune consultant",
    type_: GAUGE,
};
const STORE_SIZE: Metric = Metric {
    name: "log_cache_store_size",
    help: "Total envelopes currently held across all sources on this node",
    type_: GAUGE,
};
const CACHE_PERIOD_SECONDS: Metric = Metric {
    name: "log_cache_cache_period_seconds",
    help: "now - global oldest envelope timestamp, in seconds",
    type_: GAUGE,
};
const PRUNE_DURATION_SECONDS: Metric = Metric {
    name: "log_cache_prune_duration_seconds",
    help: "Wall-clock duration of the last prune cycle",
    type_: GAUGE,
};
const INGRESS_TOTAL: Metric = Metric {
    name: "log_cache_ingress_total",
    help: "Total envelopes accepted by Store.Put on this node",
    type_: COUNTER,
};
const EGRESS_TOTAL: Metric = Metric {
    name: "log_cache_egress_total",
    help: "Total envelopes returned by Store.Get on this node",
    type_: COUNTER,
};
const PROMQL_QUERY_DURATION_SECONDS: Metric = Metric {
    name: "log_cache_promql_query_duration_seconds",
    help: "Duration of the last PromQL query evaluated on this node",
    type_: GAUGE,
};
const PROMQL_QUERY_FAILURES_TOTAL: Metric = Metric {
    name: "log_cache_promql_query_failures_total",
    help: "Total PromQL queries that failed on this node",
    type_: COUNTER,
};

pub fn render(state: &AppState) -> String {
    let mut buf = String::with_capacity(2048);

    emit(
        &mut buf,
        &HEAP_IN_USE_BYTES,
        log_cache_alloc::HEAP_IN_USE_BYTES.load(Ordering::Relaxed) as f64,
    );
    emit(
        &mut buf,
        &SYSTEM_AVAILABLE_BYTES,
        log_cache_alloc::SYSTEM_AVAILABLE_BYTES.load(Ordering::Relaxed) as f64,
    );
    emit(
        &mut buf,
        &SYSTEM_TOTAL_BYTES,
        log_cache_alloc::SYSTEM_TOTAL_BYTES.load(Ordering::Relaxed) as f64,
    );
    emit(&mut buf, &PERCENT_FULL, log_cache_store::percent_full());
    emit(&mut buf, &STORE_SIZE, state.store.total_count() as f64);

    let now_ns = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    let cache_period_ns = (now_ns - state.store.global_oldest_ts()).max(0);
    emit(
        &mut buf,
        &CACHE_PERIOD_SECONDS,
        cache_period_ns as f64 / 1_000_000_000.0,
    );

    emit(
        &mut buf,
        &PRUNE_DURATION_SECONDS,
        log_cache_store::LAST_PRUNE_DURATION_NANOS.load(Ordering::Relaxed) as f64 / 1_000_000_000.0,
    );
    emit(&mut buf, &INGRESS_TOTAL, state.store.ingress_count() as f64);
    emit(&mut buf, &EGRESS_TOTAL, state.store.egress_count() as f64);

    emit(
        &mut buf,
        &PROMQL_QUERY_DURATION_SECONDS,
        log_cache_promql::LAST_QUERY_DURATION_NANOS.load(Ordering::Relaxed) as f64 / 1_000_000_000.0,
    );
    emit(
        &mut buf,
        &PROMQL_QUERY_FAILURES_TOTAL,
        log_cache_promql::QUERY_FAILURES_TOTAL.load(Ordering::Relaxed) as f64,
    );

    for (node, failures) in log_cache_router::send_failure_counts() {
        let _ = writeln!(
            buf,
            "log_cache_ingress_send_failures_total{{peer={node:?}}} {failures}"
        );
    }
    for (node, dropped) in log_cache_router::ingress_dropped_counts() {
        let _ = writeln!(buf, "log_cache_ingress_dropped_total{{peer={node:?}}} {dropped}");
    }

    buf
}
