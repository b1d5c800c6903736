//! Routing table: a consistent-hash assignment of `source_id`s to cluster
//! nodes, expressed as a set of inclusive `[start, end]` hash ranges per
//! node. The table is swapped atomically as a whole via `SetRanges`; there
//! is no incremental mutation visible to readers mid-update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crc::{Crc, CRC_64_XZ};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Hashes a `source_id` to its position on the ring.
pub fn hash_source_id(source_id: &str) -> u64 {
    CRC64.checksum(source_id.as_bytes())
}

/// An inclusive `[start, end]` hash range owned by one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashRange {
    pub start: u64,
    pub end: u64,
}

impl HashRange {
    pub fn contains(&self, hash: u64) -> bool {
        hash >= self.start && hash <= self.end
    }
}

/// A single, immutable snapshot of the cluster's range assignment. Node
/// order is part of the contract: `Lookup` returns node indices in this
/// order, primary (index 0 for a given source) first.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    nodes: Vec<String>,
    ranges: HashMap<String, Vec<HashRange>>,
}

impl Topology {
    pub fn new(nodes: Vec<String>, ranges: HashMap<String, Vec<HashRange>>) -> Self {
        Self { nodes, ranges }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn ranges_for(&self, node: &str) -> &[HashRange] {
        self.ranges.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the nodes that own `source_id`'s hash, in replica order
    /// (the node whose range the hash falls in directly is the primary,
    /// followed by the next `replication_factor - 1` nodes in ring order
    /// as secondary replicas).
    pub fn lookup(&self, source_id: &str, replication_factor: usize) -> Vec<String> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let hash = hash_source_id(source_id);

        let primary_idx = self
            .nodes
            .iter()
            .position(|node| self.ranges_for(node).iter().any(|r| r.contains(hash)))
            .unwrap_or(0);

        let replicas = replication_factor.min(self.nodes.len());
        (0..replicas)
            .map(|offset| self.nodes[(primary_idx + offset) % self.nodes.len()].clone())
            .collect()
    }
}

/// The orchestration-facing routing table: a swappable pointer to the
/// current `Topology`, so that readers on the hot ingress/egress path see
/// either the whole old table or the whole new one, never a partial
/// update.
pub struct RoutingTable {
    current: RwLock<Arc<Topology>>,
    epoch: AtomicUsize,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Topology::default())),
            epoch: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<Topology> {
        self.current.read().expect("routing table lock poisoned").clone()
    }

    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Atomically replaces the whole topology. This is the only mutation
    /// path; `AddRange`/`RemoveRange` are expressed in terms of it by the
    /// orchestration interface.
    pub fn set(&self, topology: Topology) {
        *self.current.write().expect("routing table lock poisoned") = Arc::new(topology);
        self.epoch.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lookup(&self, source_id: &str, replication_factor: usize) -> Vec<String> {
        self.snapshot().lookup(source_id, replication_factor)
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_topology() -> Topology {
        let mut ranges = HashMap::new();
        ranges.insert(
            "node-a".to_string(),
            vec![HashRange {
                start: 0,
                end: u64::MAX / 2,
            }],
        );
        ranges.insert(
            "node-b".to_string(),
            vec![HashRange {
                start: u64::MAX / 2 + 1,
                end: u64::MAX,
            }],
        );
        Topology::new(vec!["node-a".to_string(), "node-b".to_string()], ranges)
    }

    #[test]
    fn hash_source_id_matches_the_documented_crc64_xz_values() {
        // §8 scenario 1's worked hash values, used to confirm CRC_64_XZ is
        // the variant the wire contract actually names (see DESIGN.md
        // "CRC64 polynomial").
        assert_eq!(hash_source_id("src-zero"), 6727955504463301110);
        assert_eq!(hash_source_id("other-src"), 2416040688038506749);
    }

    #[test]
    fn lookup_is_deterministic_for_a_given_source_id() {
        let topology = two_node_topology();
        let first = topology.lookup("svc-a", 1);
        let second = topology.lookup("svc-a", 1);
        assert_eq!(first, second);
    }

    #[test]
    fn lookup_with_replication_factor_two_wraps_around_the_ring() {
        let topology = two_node_topology();
        let owners = topology.lookup("svc-a", 2);
        assert_eq!(owners.len(), 2);
        assert_ne!(owners[0], owners[1]);
    }

    #[test]
    fn set_swaps_the_whole_topology_atomically() {
        let table = RoutingTable::new();
        assert!(table.lookup("svc-a", 1).is_empty());

        table.set(two_node_topology());
        assert_eq!(table.lookup("svc-a", 1).len(), 1);
        assert_eq!(table.epoch(), 1);
    }
}
