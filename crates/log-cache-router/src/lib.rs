//! Cluster routing: a consistent-hash topology, an orchestration interface
//! that mutates it, a batched cluster-internal ingress client, and the
//! ingress/egress reverse proxies built on top of all three.

mod ingress_client;
mod orchestration;
mod proxy;
mod table;

pub use ingress_client::{
    ingress_dropped_counts, send_failure_counts, BatchedIngressClient, HttpSendTransport, IngressClientError,
    SendTransport,
};
pub use orchestration::Orchestrator;
pub use proxy::{EgressProxy, IngressProxy, ProxyError};
pub use table::{hash_source_id, HashRange, RoutingTable, Topology};
