//! The "local reader" adapter (§2: "Adapts Store to the egress interface")
//! and the trait the PromQL bridge evaluates queries against. Keeping the
//! bridge behind a trait rather than a concrete `Store` lets a cluster
//! node back it with the egress reverse-proxy (local store plus peer
//! fan-out) without this crate depending on `log-cache-router`.

use std::sync::Arc;

use log_cache_proto::Envelope;
use log_cache_store::{EnvelopeFilter, Store};

/// Anything that can answer a shard-local-or-fanned-out `Read`. Implemented
/// directly for `Arc<Store>` (the single-node case) and, by the node
/// binary, for the egress reverse-proxy (the clustered case).
#[async_trait::async_trait]
pub trait EnvelopeReader: Send + Sync {
    async fn read(
        &self,
        source_id: &str,
        start: i64,
        end: i64,
        limit: usize,
        descending: bool,
        filter: &EnvelopeFilter,
    ) -> Result<Vec<Arc<Envelope>>, log_cache_store::StoreError>;
}

/// Adapts a node-local `Store` directly to `EnvelopeReader`, with no
/// network fan-out. `Store::get` never blocks on I/O and never fails, so
/// this just calls through.
#[async_trait::async_trait]
impl EnvelopeReader for Arc<Store> {
    async fn read(
        &self,
        source_id: &str,
        start: i64,
        end: i64,
        limit: usize,
        descending: bool,
        filter: &EnvelopeFilter,
    ) -> Result<Vec<Arc<Envelope>>, log_cache_store::StoreError> {
        Ok(Store::get(self, source_id, start, end, limit, descending, filter))
    }
}
