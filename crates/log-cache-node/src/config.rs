//! Process configuration, read from the environment (§6 "Configuration").
//! A new implementation is not required to preserve variable names, only
//! the option set; see `SPEC_FULL.md` §6.

use std::time::Duration;

use clap::Parser;

fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(raw)
}

/// Log-Cache is a distributed, in-memory, bounded time-series cache for
/// telemetry envelopes. This process is one node in a fixed-size fleet.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// Address this node listens on for both the external HTTP surface
    /// and cluster-internal RPC.
    #[clap(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Ordered peer addresses (`http://host:port`), including this node's
    /// own address at `self_index`.
    #[clap(long, env = "PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// This node's index into `peers`.
    #[clap(long, env = "SELF_INDEX", default_value_t = 0)]
    pub self_index: usize,

    /// Number of nodes that hold a replica of any given hash range.
    #[clap(long, env = "REPLICATION_FACTOR", default_value_t = 1)]
    pub replication_factor: usize,

    /// Maximum envelopes retained per `source_id` before the oldest is
    /// evicted on `Put` (§4.3).
    #[clap(long, env = "MAX_PER_SOURCE", default_value_t = 100_000)]
    pub max_per_source: usize,

    /// `percent_to_fill` passed to the prune consultant (§4.2).
    #[clap(long, env = "MEMORY_LIMIT_PERCENT", default_value_t = 70.0)]
    pub memory_limit_percent: f64,

    /// Overrides the memory analyzer's `system_total` reading, capping
    /// total memory regardless of host (§4.1's `StaticMemoryAnalyzer`).
    #[clap(long, env = "MEMORY_LIMIT_BYTES")]
    pub memory_limit_bytes: Option<u64>,

    /// How often the prune loop ticks (§4.3).
    #[clap(long, env = "TRUNCATION_INTERVAL", value_parser = parse_duration, default_value = "500ms")]
    pub truncation_interval: Duration,

    /// Maximum batch size before the batched ingress client flushes
    /// early (§4.5).
    #[clap(long, env = "BATCH_SIZE", default_value_t = 100)]
    pub batch_size: usize,

    /// Maximum time a batch waits before flushing (§4.5).
    #[clap(long, env = "BATCH_INTERVAL", value_parser = parse_duration, default_value = "250ms")]
    pub batch_interval: Duration,

    /// Per-peer RPC deadline for egress fan-out and batched sends (§5).
    #[clap(long, env = "PEER_TIMEOUT", value_parser = parse_duration, default_value = "5s")]
    pub peer_timeout: Duration,

    /// Overall PromQL query deadline (§4.8).
    #[clap(long, env = "QUERY_TIMEOUT", value_parser = parse_duration, default_value = "10s")]
    pub query_timeout: Duration,

    /// TLS certificate, accepted but not wired (TLS plumbing is out of
    /// scope per §1).
    #[clap(long, env = "TLS_CERT")]
    pub tls_cert: Option<String>,
    #[clap(long, env = "TLS_KEY")]
    pub tls_key: Option<String>,
    #[clap(long, env = "TLS_CA")]
    pub tls_ca: Option<String>,

    /// Number of hash-space partitions the external scheduler assigns,
    /// accepted for completeness; the scheduler daemon itself is out of
    /// scope (§1, §4.9).
    #[clap(long, env = "SCHEDULER_COUNT")]
    pub scheduler_count: Option<usize>,

    /// URL the scheduler's leadership probe can be reached at, accepted
    /// but not dialed by this process.
    #[clap(long, env = "SCHEDULER_LEADER_PROBE_URL")]
    pub scheduler_leader_probe_url: Option<String>,
}

impl Config {
    pub fn self_addr(&self) -> String {
        self.peers
            .get(self.self_index)
            .cloned()
            .unwrap_or_else(|| format!("http://{}", self.listen_addr))
    }
}
