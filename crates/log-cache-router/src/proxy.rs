//! Ingress and egress reverse proxies: the layer that turns a client's
//! `source_id`-addressed request into the right set of node-local
//! operations, whether that's this node's own `Store` or a replica
//! reached over HTTP.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log_cache_proto::rpc::{MetaRequest, MetaResponse, ReadRequest, ReadResponse, SourceMeta};
use log_cache_proto::Envelope;
use log_cache_store::{EnvelopeFilter, Store};

use crate::ingress_client::BatchedIngressClient;
use crate::table::RoutingTable;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("peer {node} request failed: {source}")]
    Peer {
        node: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Accepts writes addressed by `source_id`, storing locally when this node
/// owns the hash range and forwarding to the owning replicas otherwise.
pub struct IngressProxy {
    self_addr: String,
    table: Arc<RoutingTable>,
    replication_factor: usize,
    local_store: Arc<Store>,
    clients: HashMap<String, BatchedIngressClient>,
}

impl IngressProxy {
    pub fn new(
        self_addr: String,
        table: Arc<RoutingTable>,
        replication_factor: usize,
        local_store: Arc<Store>,
        clients: HashMap<String, BatchedIngressClient>,
    ) -> Self {
        Self {
            self_addr,
            table,
            replication_factor,
            local_store,
            clients,
        }
    }

    /// Routes a single envelope to every node that should hold a replica
    /// of its source, storing locally instead of dialing out when this
    /// node is one of the owners.
    pub fn route(&self, envelope: Envelope) {
        let owners = self
            .table
            .lookup(&envelope.source_id, self.replication_factor);

        if owners.is_empty() {
            // No topology yet (e.g. single-node deployment): store locally.
            self.local_store.put(envelope);
            return;
        }

        for owner in &owners {
            if *owner == self.self_addr {
                self.local_store.put(envelope.clone());
            } else if let Some(client) = self.clients.get(owner) {
                client.enqueue(envelope.clone());
            } else {
                tracing::warn!(node = %owner, "no ingress client configured for owner");
            }
        }
    }
}

/// Serves reads by querying the local store plus any peer that also owns a
/// replica of the requested source, merging and re-sorting the results.
#[derive(Clone)]
pub struct EgressProxy {
    self_addr: String,
    table: Arc<RoutingTable>,
    replication_factor: usize,
    local_store: Arc<Store>,
    http_client: reqwest::Client,
    peer_timeout: Duration,
}

impl EgressProxy {
    pub fn new(
        self_addr: String,
        table: Arc<RoutingTable>,
        replication_factor: usize,
        local_store: Arc<Store>,
        http_client: reqwest::Client,
        peer_timeout: Duration,
    ) -> Self {
        Self {
            self_addr,
            table,
            replication_factor,
            local_store,
            http_client,
            peer_timeout,
        }
    }

    /// `Read(source_id, ...)` per §4.7: compute the owning node and, if
    /// local, call the local store directly; otherwise forward
    /// synchronously to that peer's egress endpoint. Unlike `Meta`, a
    /// single targeted `Read` has exactly one owner to consult (the
    /// primary) — a peer failure here is propagated rather than swallowed.
    pub async fn get(
        &self,
        source_id: &str,
        start: i64,
        end: i64,
        limit: usize,
        descending: bool,
        filter: &EnvelopeFilter,
    ) -> Result<Vec<Arc<Envelope>>, log_cache_store::StoreError> {
        let owners = self.table.lookup(source_id, self.replication_factor);
        let primary = owners.first();

        if primary.is_none() || primary == Some(&self.self_addr) {
            return Ok(self
                .local_store
                .get(source_id, start, end, limit, descending, filter));
        }

        let primary = primary.expect("checked above");
        self.fetch_remote(primary, source_id, start, end, limit, descending, filter)
            .await
            .map_err(|err| log_cache_store::StoreError::PeerUnreachable(err.to_string()))
    }

    async fn fetch_remote(
        &self,
        node: &str,
        source_id: &str,
        start: i64,
        end: i64,
        limit: usize,
        descending: bool,
        filter: &EnvelopeFilter,
    ) -> Result<Vec<Arc<Envelope>>, ProxyError> {
        let request = ReadRequest {
            source_id: source_id.to_string(),
            start_time: start,
            end_time: end,
            limit,
            envelope_types: filter.types.clone().map(|t| t.into_iter().collect()).unwrap_or_default(),
            descending,
            name_filter: filter.name.as_ref().map(|re| re.as_str().to_string()),
            local_only: true,
        };
        let url = format!("{node}/internal/read");
        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .timeout(self.peer_timeout)
            .send()
            .await
            .map_err(|source| ProxyError::Peer {
                node: node.to_string(),
                source,
            })?;
        let body: ReadResponse = response.json().await.map_err(|source| ProxyError::Peer {
            node: node.to_string(),
            source,
        })?;
        Ok(body.envelopes.into_iter().map(Arc::new).collect())
    }

    /// Fans `Meta` out to every peer in the cluster (not just the owners of
    /// a single source) and merges the per-source results.
    pub async fn meta(&self, peers: &[String]) -> MetaResponse {
        let mut sources: HashMap<String, SourceMeta> = self
            .local_store
            .meta()
            .into_iter()
            .map(|(id, meta)| {
                (
                    id,
                    SourceMeta {
                        count: meta.count,
                        expired: meta.expired,
                        oldest_ts: meta.oldest_ts,
                        newest_ts: meta.newest_ts,
                    },
                )
            })
            .collect();

        for peer in peers {
            if *peer == self.self_addr {
                continue;
            }
            match self.fetch_remote_meta(peer).await {
                Ok(remote) => {
                    for (id, meta) in remote.sources {
                        sources
                            .entry(id)
                            .and_modify(|existing| merge_meta(existing, &meta))
                            .or_insert(meta);
                    }
                }
                Err(err) => tracing::warn!(node = %peer, error = %err, "egress peer meta failed"),
            }
        }

        MetaResponse { sources }
    }

    async fn fetch_remote_meta(&self, node: &str) -> Result<MetaResponse, ProxyError> {
        let url = format!("{node}/internal/meta");
        let response = self
            .http_client
            .post(&url)
            .json(&MetaRequest { local_only: true })
            .timeout(self.peer_timeout)
            .send()
            .await
            .map_err(|source| ProxyError::Peer {
                node: node.to_string(),
                source,
            })?;
        response.json().await.map_err(|source| ProxyError::Peer {
            node: node.to_string(),
            source,
        })
    }
}

fn merge_meta(existing: &mut SourceMeta, other: &SourceMeta) {
    existing.count += other.count;
    existing.expired += other.expired;
    existing.oldest_ts = existing.oldest_ts.min(other.oldest_ts);
    existing.newest_ts = existing.newest_ts.max(other.newest_ts);
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn ingress_routes_locally_when_no_topology_is_set() {
        let table = Arc::new(RoutingTable::new());
        let store = Arc::new(Store::new(100));
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
    fn merge_meta_takes_the_widest_time_span() {
        let mut existing = SourceMeta {
            count: 1,
            expired: 0,
            oldest_ts: 10,
            newest_ts: 20,
        };
        let other = SourceMeta {
            count: 2,
            expired: 1,
            oldest_ts: 5,
            newest_ts: 25,
        };
        merge_meta(&mut existing, &other);
        assert_eq!(existing.count, 3);
        assert_eq!(existing.expired, 1);
        assert_eq!(existing.oldest_ts, 5);
        assert_eq!(existing.newest_ts, 25);
    }
}
