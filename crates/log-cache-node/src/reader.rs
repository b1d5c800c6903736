//! Adapts the egress reverse-proxy to `log_cache_promql::EnvelopeReader` so
//! the PromQL bridge reads through the same local-or-remote fan-out path
//! the `/api/v1/read` HTTP handler uses. Defined here, not in
//! `log-cache-promql` or `log-cache-router`, because implementing a
//! foreign trait for a foreign type would violate the orphan rule from
//! either crate.

use std::sync::Arc;

use log_cache_proto::Envelope;
use log_cache_store::EnvelopeFilter;

#[derive(Clone)]
pub struct EgressReader(pub log_cache_router::EgressProxy);

#[async_trait::async_trait]
impl log_cache_promql::EnvelopeReader for EgressReader {
    async fn read(
        &self,
        source_id: &str,
        start: i64,
        end: i64,
        limit: usize,
        descending: bool,
        filter: &EnvelopeFilter,
    ) -> Result<Vec<Arc<Envelope>>, log_cache_store::StoreError> {
        self.0.get(source_id, start, end, limit, descending, filter).await
    }
}
