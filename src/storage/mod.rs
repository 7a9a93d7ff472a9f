//! Storage module for crawl results
//!
//! This module holds the lookup store shared by the pipeline stages and the
//! SQLite export of its final contents:
//! - tag → record names (insertion ordered, duplicates kept)
//! - asset URL → owning record name
//! - record name → local file path

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::InMemoryStore;
pub use sqlite::{export_snapshot, SnapshotExport};
pub use traits::{LookupStore, StorageError, StorageResult};

use std::collections::BTreeMap;

/// Point-in-time copy of the lookup store, ordered for stable reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    /// Tag → record names in registration order
    pub tags: BTreeMap<String, Vec<String>>,

    /// Asset source URL → owning record name
    pub asset_refs: BTreeMap<String, String>,

    /// Record name → local file path
    pub local_assets: BTreeMap<String, String>,
}

impl StoreSnapshot {
    /// Total number of (tag, name) registrations
    pub fn tag_registrations(&self) -> usize {
        self.tags.values().map(Vec::len).sum()
    }

    /// Returns true if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.asset_refs.is_empty() && self.local_assets.is_empty()
    }
}

/// Metadata describing the run a snapshot came from
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_ms: u64,
    pub config_hash: String,
}
