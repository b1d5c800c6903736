use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log_cache_proto::rpc::{Ack, HashRange as WireHashRange, SendRequest};
use log_cache_proto::{Counter, Envelope, Payload};
use log_cache_router::{
    BatchedIngressClient, EgressProxy, IngressClientError, IngressProxy, Orchestrator, RoutingTable, SendTransport,
};
use log_cache_store::{EnvelopeFilter, Store};

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
fn ingress_proxy_stores_locally_when_self_owns_the_range() {
    let table = Arc::new(RoutingTable::new());
    {
        let orchestrator = Orchestrator::new(&table);
        let mut ranges = HashMap::new();
        ranges.insert(
            "http://self".to_string(),
            vec![WireHashRange {
                start: 0,
                end: u64::MAX,
            }],
        );
        orchestrator.set_ranges(vec!["http://self".to_string()], ranges);
    }

    let store = Arc::new(Store::new(1000));
    let proxy = IngressProxy::new(
        "http://self".to_string(),
        table,
        1,
        store.clone(),
        HashMap::new(),
    );

    proxy.route(counter("svc-a", 1));
    assert_eq!(store.total_count(), 1);
}

#[test]
fn set_ranges_is_visible_to_lookups_immediately_after_the_call_returns() {
    let table = RoutingTable::new();
    let orchestrator = Orchestrator::new(&table);

    let mut ranges = HashMap::new();
    ranges.insert(
        "node-a".to_string(),
        vec![WireHashRange {
            start: 0,
            end: u64::MAX,
        }],
    );
    orchestrator.set_ranges(vec!["node-a".to_string()], ranges);

    assert_eq!(table.lookup("svc-a", 1), vec!["node-a".to_string()]);
}

/// A `SendTransport` that delivers straight into a peer's in-process
/// `Store`, standing in for the HTTP round trip `/internal/send` would
/// otherwise make.
struct DirectTransport {
    peer_store: Arc<Store>,
}

#[async_trait::async_trait]
impl SendTransport for DirectTransport {
    async fn send(&self, _node: &str, request: SendRequest) -> Result<Ack, IngressClientError> {
        for envelope in request.envelopes {
            self.peer_store.put(envelope);
        }
        Ok(Ack::default())
    }
}

#[tokio::test]
async fn sharded_fan_out_stores_locally_and_forwards_cross_shard_envelopes() {
    // §8 scenario 1: two nodes, "src-zero" hashes into node 0's range and
    // "other-src" into node 1's. Both sources are sent to node 0; node 0
    // must store "src-zero" itself and forward "other-src" to node 1.
    let node0 = "http://node-0".to_string();
    let node1 = "http://node-1".to_string();

    let table = Arc::new(RoutingTable::new());
    {
        let orchestrator = Orchestrator::new(&table);
        // "src-zero" hashes to 6_727_955_504_463_301_110 (node 0's range);
        // "other-src" hashes to 2_416_040_688_038_506_749 (node 1's range).
        let mut ranges = HashMap::new();
        ranges.insert(
            node0.clone(),
            vec![WireHashRange {
                start: 5_000_000_000_000_000_000,
                end: u64::MAX,
            }],
        );
        ranges.insert(
            node1.clone(),
            vec![WireHashRange {
                start: 0,
                end: 4_999_999_999_999_999_999,
            }],
        );
        orchestrator.set_ranges(vec![node0.clone(), node1.clone()], ranges);
    }

    let store0 = Arc::new(Store::new(1000));
    let store1 = Arc::new(Store::new(1000));

    let transport = Arc::new(DirectTransport {
        peer_store: store1.clone(),
    });
    let client_to_node1 =
        BatchedIngressClient::new(node1.clone(), transport, 100, Duration::from_millis(10));
    let mut clients = HashMap::new();
    clients.insert(node1.clone(), client_to_node1.clone());

    let proxy = IngressProxy::new(node0.clone(), table.clone(), 1, store0.clone(), clients);

    for ts in [1, 2, 3, 4] {
        proxy.route(counter("src-zero", ts));
    }
    for ts in [2, 3] {
        proxy.route(counter("other-src", ts));
    }

    client_to_node1.flush().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // node 0 holds "src-zero" locally; descending read returns newest-first.
    let egress0 = EgressProxy::new(
        node0.clone(),
        table.clone(),
        1,
        store0.clone(),
        reqwest::Client::new(),
        Duration::from_secs(5),
    );
    let top_two = egress0
        .get("src-zero", 0, i64::MAX, 2, true, &EnvelopeFilter::default())
        .await
        .unwrap();
    let timestamps: Vec<i64> = top_two.iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, vec![4, 3]);

    // node 0 never stored "other-src" locally; it was forwarded to node 1.
    assert!(store0
        .get("other-src", 0, i64::MAX, usize::MAX, false, &EnvelopeFilter::default())
        .is_empty());
    let forwarded = store1.get("other-src", 0, i64::MAX, usize::MAX, false, &EnvelopeFilter::default());
    assert_eq!(forwarded.len(), 2);
}
