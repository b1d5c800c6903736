//! Orchestration interface: the handful of operations an external
//! coordinator uses to reshape the cluster's routing table. `AddRange` and
//! `RemoveRange` are read-modify-write conveniences built on top of the
//! single atomic `SetRanges` swap; `ListRanges` is a read-only snapshot.

use std::collections::HashMap;

use log_cache_proto::rpc::HashRange as WireHashRange;

use crate::table::{HashRange, RoutingTable, Topology};

fn to_wire(ranges: &[HashRange]) -> Vec<WireHashRange> {
    ranges
        .iter()
        .map(|r| WireHashRange {
            start: r.start,
            end: r.end,
        })
        .collect()
}

fn from_wire(ranges: &[WireHashRange]) -> Vec<HashRange> {
    ranges
        .iter()
        .map(|r| HashRange {
            start: r.start,
            end: r.end,
        })
        .collect()
}

pub struct Orchestrator<'a> {
    table: &'a RoutingTable,
}

impl<'a> Orchestrator<'a> {
    pub fn new(table: &'a RoutingTable) -> Self {
        Self { table }
    }

    /// Replaces the entire topology in one atomic step.
    pub fn set_ranges(&self, nodes: Vec<String>, ranges: HashMap<String, Vec<WireHashRange>>) {
        let ranges = ranges
            .into_iter()
            .map(|(node, r)| (node, from_wire(&r)))
            .collect();
        self.table.set(Topology::new(nodes, ranges));
    }

    /// Adds `range` to `node`'s assignment, leaving every other node's
    /// ranges untouched, via a full read-modify-write of the table.
    pub fn add_range(&self, node: &str, range: WireHashRange) {
        let snapshot = self.table.snapshot();
        let mut nodes = snapshot.nodes().to_vec();
        if !nodes.iter().any(|n| n == node) {
            nodes.push(node.to_string());
        }

        let mut ranges: HashMap<String, Vec<HashRange>> = nodes
            .iter()
            .map(|n| (n.clone(), snapshot.ranges_for(n).to_vec()))
            .collect();
        ranges
            .entry(node.to_string())
            .or_default()
            .push(HashRange {
                start: range.start,
                end: range.end,
            });

        self.table.set(Topology::new(nodes, ranges));
    }

    /// Removes `range` from `node`'s assignment if present.
    pub fn remove_range(&self, node: &str, range: WireHashRange) {
        let snapshot = self.table.snapshot();
        let nodes = snapshot.nodes().to_vec();

        let ranges: HashMap<String, Vec<HashRange>> = nodes
            .iter()
            .map(|n| {
                let mut owned = snapshot.ranges_for(n).to_vec();
                if n == node {
                    owned.retain(|r| !(r.start == range.start && r.end == range.end));
                }
                (n.clone(), owned)
            })
            .collect();

        self.table.set(Topology::new(nodes, ranges));
    }

    /// A read-only snapshot suitable for `ListRanges` responses.
    pub fn list_ranges(&self) -> (Vec<String>, HashMap<String, Vec<WireHashRange>>) {
        let snapshot = self.table.snapshot();
        let nodes = snapshot.nodes().to_vec();
        let ranges = nodes
            .iter()
            .map(|n| (n.clone(), to_wire(snapshot.ranges_for(n))))
            .collect();
        (nodes, ranges)
    }
}
