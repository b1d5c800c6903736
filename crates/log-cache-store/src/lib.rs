//! The node-local telemetry cache: bounded per-source storage, a
//! background memory-pressure-driven prune cycle, and the filtering logic
//! applied to reads.

mod consultant;
mod filter;
mod heap;
mod source;
mod store;

pub use consultant::{percent_full, DefaultPruneConsultant, FixedPruneConsultant, PruneConsultant};
pub use filter::EnvelopeFilter;
pub use source::{SourceMeta, MAX_FUDGE};
pub use store::{spawn_pruner, Store, LAST_PRUNE_DURATION_NANOS};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid name filter pattern: {0}")]
    InvalidNameFilter(#[from] regex::Error),
    #[error("peer {0} unreachable")]
    PeerUnreachable(String),
}
