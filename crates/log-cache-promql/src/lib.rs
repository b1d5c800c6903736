//! The PromQL adapter: parses a query with `promql-parser`, expands its
//! `source_id` matchers into one `Read` per source (§4.8), evaluates a
//! deliberately-scoped subset of PromQL (bare vector selectors with label
//! matchers — no aggregation, binary arithmetic, or functions; see
//! `DESIGN.md` "OQ-2"), and renders `InstantQuery`/`RangeQuery` results in
//! the shape the HTTP surface's JSON API expects.

mod reader;
mod queryable;
mod sanitizer;
mod selector;

pub use reader::EnvelopeReader;
pub use queryable::{evaluate_selector, LabelSet, Point, Series};
pub use sanitizer::sanitize_metric_name;
pub use selector::{extract_selector, replace_source_id_sets, LabelConstraint, Selector};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log_cache_proto::rpc::{MatrixSeries, QueryResult, ScalarSample, VectorSample};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromqlError {
    #[error("bad_data: {0}")]
    BadData(String),
    #[error("timeout: query exceeded {0:?}")]
    Timeout(Duration),
    #[error("unsupported query: {0}")]
    Unsupported(String),
    #[error("upstream read failed: {0}")]
    Upstream(String),
}

impl PromqlError {
    pub fn kind(&self) -> log_cache_proto::rpc::ErrorKind {
        match self {
            PromqlError::BadData(_) | PromqlError::Unsupported(_) => {
                log_cache_proto::rpc::ErrorKind::BadData
            }
            PromqlError::Timeout(_) => log_cache_proto::rpc::ErrorKind::Timeout,
            PromqlError::Upstream(_) => log_cache_proto::rpc::ErrorKind::Internal,
        }
    }
}

impl From<log_cache_store::StoreError> for PromqlError {
    fn from(err: log_cache_store::StoreError) -> Self {
        PromqlError::Upstream(err.to_string())
    }
}

/// Per-query duration (nanoseconds, last observation) and a running
/// failure counter, published through the node's `/metrics` handler —
/// `log_cache_promql_query_duration_seconds` / `log_cache_promql_query_failures_total`
/// in spirit, though this crate only keeps the raw numbers; the binary
/// formats them.
pub static LAST_QUERY_DURATION_NANOS: AtomicU64 = AtomicU64::new(0);
pub static QUERY_FAILURES_TOTAL: AtomicU64 = AtomicU64::new(0);

fn record_duration(started: std::time::Instant) {
    LAST_QUERY_DURATION_NANOS.store(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
}

fn record_failure() {
    QUERY_FAILURES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

/// Parses a PromQL expression and reduces it to a `Selector`, the only
/// shape this adapter evaluates.
fn parse_selector(query: &str) -> Result<Selector, PromqlError> {
    let expr = promql_parser::parser::parse(query)
        .map_err(|err| PromqlError::BadData(format!("parsing {query:?}: {err}")))?;
    extract_selector(&expr)
}

/// A single `(timestamp_ms, value)` sample, the unit both instant and
/// range evaluation work in before being rendered into the wire shape.
fn latest_at_or_before(series: &Series, at_ms: i64) -> Option<f64> {
    series
        .points
        .iter()
        .rev()
        .find(|p| p.timestamp_ms <= at_ms)
        .map(|p| p.value)
}

fn labels_to_metric(labels: &LabelSet, metric_name: &str) -> std::collections::HashMap<String, String> {
    let mut metric: std::collections::HashMap<String, String> =
        labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    metric.insert("__name__".to_string(), metric_name.to_string());
    metric
}

fn format_sample(value: f64, timestamp_ms: i64) -> ScalarSample {
    ScalarSample(timestamp_ms as f64 / 1000.0, format!("{value}"))
}

/// The PromQL bridge: evaluates `InstantQuery`/`RangeQuery` against an
/// `EnvelopeReader` (a node-local `Store` in a single-node deployment, or
/// the egress reverse-proxy in a clustered one), bounded by `timeout`.
pub struct PromqlAdapter<R> {
    reader: R,
    timeout: Duration,
}

impl<R: EnvelopeReader> PromqlAdapter<R> {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(reader: R, timeout: Duration) -> Self {
        Self { reader, timeout }
    }

    /// `InstantQuery(query, time)` → a vector of one sample per matching
    /// series at or immediately before `time` (§6's `/api/v1/query`).
    pub async fn instant_query(&self, query: &str, at_ms: i64) -> Result<QueryResult, PromqlError> {
        let started = std::time::Instant::now();
        let result = self.instant_query_inner(query, at_ms).await;
        record_duration(started);
        if result.is_err() {
            record_failure();
        }
        result
    }

    async fn instant_query_inner(&self, query: &str, at_ms: i64) -> Result<QueryResult, PromqlError> {
        let selector = parse_selector(query)?;
        let metric_name = selector
            .metric_name
            .clone()
            .ok_or_else(|| PromqlError::BadData("query has no metric name".to_string()))?;

        let fut = async {
            let series = evaluate_selector(&self.reader, &selector, 0, at_ms * 1_000_000).await?;
            let mut samples = Vec::new();
            for s in series {
                if let Some(value) = latest_at_or_before(&s, at_ms) {
                    samples.push(VectorSample {
                        metric: labels_to_metric(&s.labels, &metric_name),
                        value: format_sample(value, at_ms),
                    });
                }
            }
            Ok(QueryResult::Vector(samples))
        };

        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| PromqlError::Timeout(self.timeout))?
    }

    /// `RangeQuery(query, start, end, step)` → a matrix, one sample per
    /// series per step, step-sampled with carry-forward of the latest
    /// value at or before each step point (§6's `/api/v1/query_range`).
    pub async fn range_query(
        &self,
        query: &str,
        start_ms: i64,
        end_ms: i64,
        step_ms: i64,
    ) -> Result<QueryResult, PromqlError> {
        let started = std::time::Instant::now();
        let result = self.range_query_inner(query, start_ms, end_ms, step_ms).await;
        record_duration(started);
        if result.is_err() {
            record_failure();
        }
        result
    }

    async fn range_query_inner(
        &self,
        query: &str,
        start_ms: i64,
        end_ms: i64,
        step_ms: i64,
    ) -> Result<QueryResult, PromqlError> {
        if step_ms <= 0 {
            return Err(PromqlError::BadData("step must be positive".to_string()));
        }
        let selector = parse_selector(query)?;
        let metric_name = selector
            .metric_name
            .clone()
            .ok_or_else(|| PromqlError::BadData("query has no metric name".to_string()))?;

        let fut = async {
            let series =
                evaluate_selector(&self.reader, &selector, start_ms * 1_000_000, end_ms * 1_000_000).await?;
            let mut out = Vec::new();
            for s in series {
                let mut values = Vec::new();
                let mut t = start_ms;
                while t <= end_ms {
                    if let Some(value) = latest_at_or_before(&s, t) {
                        values.push(format_sample(value, t));
                    }
                    t += step_ms;
                }
                if !values.is_empty() {
                    out.push(MatrixSeries {
                        metric: labels_to_metric(&s.labels, &metric_name),
                        values,
                    });
                }
            }
            Ok(QueryResult::Matrix(out))
        };

        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| PromqlError::Timeout(self.timeout))?
    }
}

/// Parses a `step` value per §4.8: fractional seconds, or a number
/// followed by one of `s|m|h|d|w|y` (24h days, 7d weeks, 365d years).
pub fn parse_step(raw: &str) -> Result<Duration, PromqlError> {
    let raw = raw.trim();
    let unit_len = raw
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_alphabetic())
        .count();
    if unit_len == 0 {
        let seconds: f64 = raw
            .parse()
            .map_err(|_| PromqlError::BadData(format!("invalid step {raw:?}")))?;
        return Ok(Duration::from_secs_f64(seconds));
    }

    let split_at = raw.len() - unit_len;
    let (number, unit) = raw.split_at(split_at);
    let number: f64 = number
        .parse()
        .map_err(|_| PromqlError::BadData(format!("invalid step {raw:?}")))?;
    let seconds = match unit {
        "s" => number,
        "m" => number * 60.0,
        "h" => number * 3_600.0,
        "d" => number * 86_400.0,
        "w" => number * 7.0 * 86_400.0,
        "y" => number * 365.0 * 86_400.0,
        other => return Err(PromqlError::BadData(format!("unknown step unit {other:?}"))),
    };
    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use log_cache_proto::{Counter, Envelope, Payload, Timer};
    use log_cache_store::Store;
    use std::sync::Arc;

    fn counter(source_id: &str, ts: i64, name: &str, total: u64) -> Envelope {
        Envelope {
            source_id: source_id.to_string(),
            instance_id: None,
            timestamp: ts,
            tags: Default::default(),
            payload: Some(Payload::Counter(Counter {
                name: name.to_string(),
                total,
            })),
        }
    }

    fn timer(source_id: &str, ts: i64, name: &str, start: i64, stop: i64) -> Envelope {
        Envelope {
            source_id: source_id.to_string(),
            instance_id: None,
            timestamp: ts,
            tags: Default::default(),
            payload: Some(Payload::Timer(Timer {
                name: name.to_string(),
                start,
                stop,
            })),
        }
    }

    #[tokio::test]
    async fn instant_query_returns_sanitized_counter_value() {
        // Scenario 4: counter "some-metric$count" total=104 under
        // "some-id-1" is queryable as some_metric_count{source_id="some-id-1"}.
        let store = Arc::new(Store::new(100));
        store.put(counter("some-id-1", 1_000_000_000, "some-metric$count", 104));

        let adapter = PromqlAdapter::new(store, PromqlAdapter::<Arc<Store>>::DEFAULT_TIMEOUT);
        let result = adapter
            .instant_query(r#"some_metric_count{source_id="some-id-1"}"#, 2_000)
            .await
            .unwrap();

        match result {
            QueryResult::Vector(samples) => {
                assert_eq!(samples.len(), 1);
                assert_eq!(samples[0].value.1, "104");
            }
            other => panic!("expected vector, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn instant_query_derives_timer_value_from_stop_minus_start() {
        // Scenario 5: timer start=99, stop=101 -> value 2.
        let store = Arc::new(Store::new(100));
        store.put(timer("some-id-1", 1_000_000_000, "metric", 99, 101));

        let adapter = PromqlAdapter::new(store, PromqlAdapter::<Arc<Store>>::DEFAULT_TIMEOUT);
        let result = adapter
            .instant_query(r#"metric{source_id="some-id-1"}"#, 2_000)
            .await
            .unwrap();

        match result {
            QueryResult::Vector(samples) => {
                assert_eq!(samples.len(), 1);
                assert_eq!(samples[0].value.1, "2");
            }
            other => panic!("expected vector, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_missing_source_id_is_bad_data() {
        let store = Arc::new(Store::new(100));
        let adapter = PromqlAdapter::new(store, PromqlAdapter::<Arc<Store>>::DEFAULT_TIMEOUT);
        let err = adapter.instant_query("metric", 0).await.unwrap_err();
        assert!(matches!(err, PromqlError::BadData(_)));
        assert_eq!(err.kind(), log_cache_proto::rpc::ErrorKind::BadData);
    }

    #[tokio::test]
    async fn range_query_step_samples_with_carry_forward() {
        let store = Arc::new(Store::new(100));
        store.put(counter("svc-a", 1_000_000_000, "cpu_usage", 10));
        store.put(counter("svc-a", 3_000_000_000, "cpu_usage", 30));

        let adapter = PromqlAdapter::new(store, PromqlAdapter::<Arc<Store>>::DEFAULT_TIMEOUT);
        let result = adapter
            .range_query(r#"cpu_usage{source_id="svc-a"}"#, 1_000, 4_000, 1_000)
            .await
            .unwrap();

        match result {
            QueryResult::Matrix(series) => {
                assert_eq!(series.len(), 1);
                // t=1000 -> 10, t=2000 -> carried forward 10, t=3000 -> 30, t=4000 -> carried forward 30.
                let values: Vec<&str> = series[0].values.iter().map(|s| s.1.as_str()).collect();
                assert_eq!(values, vec!["10", "10", "30", "30"]);
            }
            other => panic!("expected matrix, got {other:?}"),
        }
    }

    #[test]
    fn parse_step_accepts_unit_suffixes() {
        assert_eq!(parse_step("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_step("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_step("1h").unwrap(), Duration::from_secs(3_600));
        assert_eq!(parse_step("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_step("1w").unwrap(), Duration::from_secs(7 * 86_400));
        assert_eq!(parse_step("1y").unwrap(), Duration::from_secs(365 * 86_400));
    }

    #[test]
    fn parse_step_accepts_bare_fractional_seconds() {
        assert_eq!(parse_step("1.5").unwrap(), Duration::from_secs_f64(1.5));
    }
}
