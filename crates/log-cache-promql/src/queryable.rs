//! The `Queryable` bridge: given a selector (metric name, `source_id` set,
//! label constraints) and a time range, reads matching envelopes out of
//! the reader and buckets them into series keyed by their sorted label
//! set.

use std::collections::BTreeMap;

use log_cache_proto::{Envelope, EnvelopeType, Payload};
use log_cache_store::EnvelopeFilter;

use crate::reader::EnvelopeReader;
use crate::sanitizer::sanitize_metric_name;
use crate::selector::Selector;

/// One label set, sorted by key, shared by every point in a `Series`.
pub type LabelSet = BTreeMap<String, String>;

#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub timestamp_ms: i64,
    pub value: f64,
}

#[derive(Clone, Debug, Default)]
pub struct Series {
    pub labels: LabelSet,
    pub points: Vec<Point>,
}

/// Reads every `source_id` named by `selector` from `reader` over
/// `[start_ns, end_ns]` — one `Read` per `source_id`, per §4.8 step 2 and
/// the regex-alternation merge rule at the end of §4.8 — extracts matching
/// points for `selector`'s metric name, and buckets them by sorted label
/// set (§4.8 steps 2-5).
pub async fn evaluate_selector(
    reader: &dyn EnvelopeReader,
    selector: &Selector,
    start_ns: i64,
    end_ns: i64,
) -> Result<Vec<Series>, log_cache_store::StoreError> {
    let mut by_labels: BTreeMap<LabelSet, Series> = BTreeMap::new();
    let filter = EnvelopeFilter::new(
        Some([EnvelopeType::Gauge, EnvelopeType::Counter, EnvelopeType::Timer].into()),
        None,
    );

    // A 1-second lookback covers any fudge-key jitter at the window's
    // lower edge (§4.8 step 2: start = mint - 1s).
    let start = start_ns.saturating_sub(1_000_000_000);

    for source_id in &selector.source_ids {
        let envelopes = reader
            .read(source_id, start, end_ns, usize::MAX, false, &filter)
            .await?;

        for envelope in envelopes {
            for (name, value) in extract_points(&envelope) {
                if Some(&name) != selector.metric_name.as_ref() {
                    continue;
                }
                let Some(labels) = labels_for(&envelope, source_id, selector) else {
                    continue;
                };
                let point = Point {
                    timestamp_ms: envelope.timestamp / 1_000_000,
                    value,
                };
                by_labels
                    .entry(labels.clone())
                    .or_insert_with(|| Series {
                        labels,
                        points: Vec::new(),
                    })
                    .points
                    .push(point);
            }
        }
    }

    for series in by_labels.values_mut() {
        series.points.sort_by_key(|p| p.timestamp_ms);
    }

    Ok(by_labels.into_values().collect())
}

/// One `(sanitized name, value)` pair per measurement the envelope carries.
/// A `Counter`/`Timer` payload carries exactly one; a `Gauge` payload (the
/// CF `ContainerMetric` shape: cpu/memory/disk in one envelope) carries one
/// per map key, and the caller matches each against the query's metric
/// name rather than only ever seeing whichever key iterates first.
fn extract_points(envelope: &Envelope) -> Vec<(String, f64)> {
    match envelope.payload.as_ref() {
        Some(Payload::Counter(c)) => vec![(sanitize_metric_name(&c.name), c.total as f64)],
        Some(Payload::Timer(t)) => vec![(sanitize_metric_name(&t.name), (t.stop - t.start) as f64)],
        Some(Payload::Gauge(g)) => g
            .metrics
            .iter()
            .map(|(k, v)| (sanitize_metric_name(k), v.value))
            .collect(),
        _ => Vec::new(),
    }
}

fn labels_for(envelope: &Envelope, source_id: &str, selector: &Selector) -> Option<LabelSet> {
    let mut labels: LabelSet = envelope.tags.clone().into_iter().collect();
    labels.insert("source_id".to_string(), source_id.to_string());
    if let Some(instance_id) = &envelope.instance_id {
        if !instance_id.is_empty() {
            labels.insert("instance_id".to_string(), instance_id.clone());
        }
    }

    for (name, constraint) in &selector.other_constraints {
        if !constraint.holds(labels.get(name).map(String::as_str)) {
            return None;
        }
    }
    Some(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use log_cache_proto::Counter;
    use log_cache_store::Store;
    use std::sync::Arc;

    fn counter_envelope(source_id: &str, ts: i64, name: &str, total: u64) -> Envelope {
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

    #[tokio::test]
    async fn evaluate_selector_buckets_by_label_set() {
        let store = Arc::new(Store::new(100));
        store.put(counter_envelope("svc-a", 1_000_000_000, "cpu_usage", 10));
        store.put(counter_envelope("svc-a", 2_000_000_000, "cpu_usage", 20));

        let selector = Selector {
            metric_name: Some("cpu_usage".to_string()),
            source_ids: vec!["svc-a".to_string()],
            other_constraints: Vec::new(),
        };

        let series = evaluate_selector(&store, &selector, 0, 3_000_000_000).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].points.len(), 2);
        assert_eq!(series[0].points[0].value, 10.0);
        assert_eq!(series[0].labels.get("source_id").unwrap(), "svc-a");
    }

    #[tokio::test]
    async fn non_matching_metric_name_is_excluded() {
        let store = Arc::new(Store::new(100));
        store.put(counter_envelope("svc-a", 1_000_000_000, "mem_usage", 10));

        let selector = Selector {
            metric_name: Some("cpu_usage".to_string()),
            source_ids: vec!["svc-a".to_string()],
            other_constraints: Vec::new(),
        };

        let series = evaluate_selector(&store, &selector, 0, 3_000_000_000).await.unwrap();
        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn multiple_source_ids_merge_into_separate_series() {
        let store = Arc::new(Store::new(100));
        store.put(counter_envelope("svc-a", 1_000_000_000, "cpu_usage", 10));
        store.put(counter_envelope("svc-b", 1_000_000_000, "cpu_usage", 20));

        let selector = Selector {
            metric_name: Some("cpu_usage".to_string()),
            source_ids: vec!["svc-a".to_string(), "svc-b".to_string()],
            other_constraints: Vec::new(),
        };

        let series = evaluate_selector(&store, &selector, 0, 3_000_000_000).await.unwrap();
        assert_eq!(series.len(), 2);
    }

    #[tokio::test]
    async fn gauge_with_multiple_keys_matches_the_queried_key_regardless_of_map_order() {
        use log_cache_proto::{Gauge, GaugeValue};

        let store = Arc::new(Store::new(100));
        let mut metrics = std::collections::HashMap::new();
        metrics.insert(
            "cpu".to_string(),
            GaugeValue {
                value: 1.5,
                unit: "percentage".to_string(),
            },
        );
        metrics.insert(
            "memory".to_string(),
            GaugeValue {
                value: 2048.0,
                unit: "bytes".to_string(),
            },
        );
        metrics.insert(
            "disk".to_string(),
            GaugeValue {
                value: 4096.0,
                unit: "bytes".to_string(),
            },
        );
        store.put(Envelope {
            source_id: "svc-a".to_string(),
            instance_id: None,
            timestamp: 1_000_000_000,
            tags: Default::default(),
            payload: Some(Payload::Gauge(Gauge { metrics })),
        });

        for (queried, expected) in [("cpu", 1.5), ("memory", 2048.0), ("disk", 4096.0)] {
            let selector = Selector {
                metric_name: Some(queried.to_string()),
                source_ids: vec!["svc-a".to_string()],
                other_constraints: Vec::new(),
            };
            let series = evaluate_selector(&store, &selector, 0, 3_000_000_000).await.unwrap();
            assert_eq!(series.len(), 1, "expected a series for {queried:?}");
            assert_eq!(series[0].points.len(), 1);
            assert_eq!(series[0].points[0].value, expected);
        }
    }
}
