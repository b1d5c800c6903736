//! Wires the three core subsystems (store, router, PromQL adapter)
//! together into one node, plus the background tasks (pruner, batched
//! ingress flushers) that keep them running.

use std::collections::HashMap;
use std::sync::Arc;

use log_cache_alloc::{JemallocMemoryAnalyzer, MemoryAnalyzer, StaticMemoryAnalyzer};
use log_cache_promql::PromqlAdapter;
use log_cache_router::{BatchedIngressClient, EgressProxy, HttpSendTransport, IngressProxy, RoutingTable};
use log_cache_store::{spawn_pruner, DefaultPruneConsultant, Store};

use crate::config::Config;
use crate::reader::EgressReader;

pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub table: Arc<RoutingTable>,
    pub ingress: IngressProxy,
    pub egress: EgressProxy,
    pub promql: PromqlAdapter<EgressReader>,
    pub http_client: reqwest::Client,
    pub start_time: std::time::Instant,
    pub _pruner: tokio::task::JoinHandle<()>,
    pub _shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let store = Arc::new(Store::new(config.max_per_source));
        let table = Arc::new(RoutingTable::new());
        let http_client = reqwest::Client::new();

        let analyzer: Arc<dyn MemoryAnalyzer> = match config.memory_limit_bytes {
            Some(bytes) => Arc::new(StaticMemoryAnalyzer::new(JemallocMemoryAnalyzer::new()?, bytes)),
            None => Arc::new(JemallocMemoryAnalyzer::new()?),
        };
        let consultant = Arc::new(DefaultPruneConsultant::new(config.memory_limit_percent));

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let pruner = spawn_pruner(
            store.clone(),
            analyzer,
            consultant,
            config.truncation_interval,
            shutdown_rx,
        );

        let self_addr = config.self_addr();
        let mut clients: HashMap<String, BatchedIngressClient> = HashMap::new();
        for peer in &config.peers {
            if *peer == self_addr {
                continue;
            }
            let transport = Arc::new(HttpSendTransport::new(http_client.clone()));
            clients.insert(
                peer.clone(),
                BatchedIngressClient::new(peer.clone(), transport, config.batch_size, config.batch_interval),
            );
        }

        let ingress = IngressProxy::new(
            self_addr.clone(),
            table.clone(),
            config.replication_factor,
            store.clone(),
            clients,
        );
        let egress = EgressProxy::new(
            self_addr.clone(),
            table.clone(),
            config.replication_factor,
            store.clone(),
            http_client.clone(),
            config.peer_timeout,
        );

        let reader = EgressReader(egress.clone());
        let promql = PromqlAdapter::new(reader, config.query_timeout);

        Ok(Arc::new(Self {
            config,
            store,
            table,
            ingress,
            egress,
            promql,
            http_client,
            start_time: std::time::Instant::now(),
            _pruner: pruner,
            _shutdown_tx: shutdown_tx,
        }))
    }
}
