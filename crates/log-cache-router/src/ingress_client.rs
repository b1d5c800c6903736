//! Batched ingress client: buffers outgoing envelopes per destination node
//! and flushes them as a single `SendRequest` either when the batch fills
//! up or when a flush interval elapses, whichever comes first. When the
//! pending batch is already at capacity, a new envelope evicts the oldest
//! one in the batch rather than being dropped itself or blocking the
//! caller; a flush that fails against the transport increments a
//! send-failure counter tagged by the destination node.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use log_cache_proto::rpc::{Ack, SendRequest};
use log_cache_proto::Envelope;
use peer_counters::Counters;
use tokio::sync::Notify;

#[derive(Debug, thiserror::Error)]
pub enum IngressClientError {
    #[error("request to {node} failed: {source}")]
    Request {
        node: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Abstraction over "deliver this batch to a node", so tests can substitute
/// an in-memory recorder for a real HTTP round trip.
#[async_trait::async_trait]
pub trait SendTransport: Send + Sync {
    async fn send(&self, node: &str, request: SendRequest) -> Result<Ack, IngressClientError>;
}

pub struct HttpSendTransport {
    client: reqwest::Client,
}

impl HttpSendTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SendTransport for HttpSendTransport {
    async fn send(&self, node: &str, request: SendRequest) -> Result<Ack, IngressClientError> {
        let url = format!("{node}/internal/send");
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|source| IngressClientError::Request {
                node: node.to_string(),
                source,
            })?;
        response
            .json::<Ack>()
            .await
            .map_err(|source| IngressClientError::Request {
                node: node.to_string(),
                source,
            })
    }
}

mod peer_counters {
    //! A tiny lazily-initialized `DashMap<String, AtomicU64>` pair, used to
    //! publish per-peer send-failure and ingress-dropped counters without
    //! pulling in a dedicated lazy-static crate the rest of the workspace
    //! doesn't otherwise need.
    use super::*;
    use std::sync::OnceLock;

    pub struct Counters {
        send_failures: OnceLock<DashMap<String, AtomicU64>>,
        ingress_dropped: OnceLock<DashMap<String, AtomicU64>>,
    }

    impl Counters {
        pub const fn new() -> Self {
            Self {
                send_failures: OnceLock::new(),
                ingress_dropped: OnceLock::new(),
            }
        }

        fn send_failures(&self) -> &DashMap<String, AtomicU64> {
            self.send_failures.get_or_init(DashMap::new)
        }

        fn ingress_dropped(&self) -> &DashMap<String, AtomicU64> {
            self.ingress_dropped.get_or_init(DashMap::new)
        }

        pub fn record_send_failure(&self, node: &str) {
            self.send_failures()
                .entry(node.to_string())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }

        pub fn record_dropped(&self, node: &str) {
            self.ingress_dropped()
                .entry(node.to_string())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }

        pub fn send_failure_counts(&self) -> Vec<(String, u64)> {
            self.send_failures()
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
                .collect()
        }

        pub fn ingress_dropped_counts(&self) -> Vec<(String, u64)> {
            self.ingress_dropped()
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
                .collect()
        }
    }
}

static COUNTERS: Counters = Counters::new();

/// Total envelopes dropped across all destination nodes for failing to
/// reach a remote peer in time, published through the node's `/metrics`
/// handler as `log_cache_ingress_send_failures_total{peer=...}`.
pub fn send_failure_counts() -> Vec<(String, u64)> {
    COUNTERS.send_failure_counts()
}

/// Total envelopes evicted from a full outbound batch before it could be
/// flushed, published as `log_cache_ingress_dropped_total{peer=...}`.
pub fn ingress_dropped_counts() -> Vec<(String, u64)> {
    COUNTERS.ingress_dropped_counts()
}

struct Batch {
    queue: VecDeque<Envelope>,
    capacity: usize,
}

/// Per-node handle accepting envelopes to forward. Cheap to clone; every
/// clone shares the same batch and background flush task.
#[derive(Clone)]
pub struct BatchedIngressClient {
    node: String,
    batch: Arc<Mutex<Batch>>,
    notify: Arc<Notify>,
    _handle: Arc<tokio::task::JoinHandle<()>>,
}

impl BatchedIngressClient {
    pub fn new(
        node: String,
        transport: Arc<dyn SendTransport>,
        max_batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        let batch = Arc::new(Mutex::new(Batch {
            queue: VecDeque::with_capacity(max_batch_size),
            capacity: max_batch_size,
        }));
        let notify = Arc::new(Notify::new());

        let handle = tokio::spawn(Self::run(
            node.clone(),
            transport,
            flush_interval,
            batch.clone(),
            notify.clone(),
        ));

        Self {
            node,
            batch,
            notify,
            _handle: Arc::new(handle),
        }
    }

    /// Queues `envelope` for delivery. If the batch is already at its
    /// configured capacity, evicts the oldest queued envelope to make
    /// room, incrementing this node's dropped-envelope counter, rather
    /// than rejecting the new one or blocking the caller.
    pub fn enqueue(&self, envelope: Envelope) {
        let became_full = {
            let mut batch = self.batch.lock().unwrap();
            if batch.queue.len() >= batch.capacity {
                batch.queue.pop_front();
                COUNTERS.record_dropped(&self.node);
            }
            batch.queue.push_back(envelope);
            batch.queue.len() >= batch.capacity
        };
        if became_full {
            self.notify.notify_one();
        }
    }

    /// Requests an out-of-band flush, used by graceful shutdown.
    pub async fn flush(&self) {
        self.notify.notify_one();
        // Give the background task a tick to observe the notification
        // before the caller moves on (e.g. process exit).
        tokio::task::yield_now().await;
    }

    async fn run(
        node: String,
        transport: Arc<dyn SendTransport>,
        flush_interval: Duration,
        batch: Arc<Mutex<Batch>>,
        notify: Arc<Notify>,
    ) {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = notify.notified() => {}
            }
            Self::flush_batch(&node, transport.as_ref(), &batch).await;
        }
    }

    async fn flush_batch(node: &str, transport: &dyn SendTransport, batch: &Arc<Mutex<Batch>>) {
        let envelopes: Vec<Envelope> = {
            let mut batch = batch.lock().unwrap();
            if batch.queue.is_empty() {
                return;
            }
            std::mem::take(&mut batch.queue).into_iter().collect()
        };
        let request = SendRequest {
            envelopes,
            local_only: false,
        };
        if let Err(err) = transport.send(node, request).await {
            COUNTERS.record_send_failure(node);
            tracing::warn!(%node, error = %err, "batched send failed");
        }
    }
}
