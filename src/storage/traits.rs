//! Storage traits and error types
//!
//! This module defines the trait interface for the lookup store and the
//! error type of the snapshot export.

use crate::storage::StoreSnapshot;
use thiserror::Error;

/// Errors that can occur while exporting stored data
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for lookup store implementations
///
/// All writes are single-key upserts with last-write-wins semantics, except
/// tags, which append. Implementations must be safe to share between the
/// concurrently running stages.
pub trait LookupStore: Send + Sync {
    /// Appends `name` to the list of records carrying `tag`
    fn put_tag(&self, tag: &str, name: &str);

    /// Records that the asset at `url` depicts record `name`
    fn put_asset_ref(&self, url: &str, name: &str);

    /// Records where the asset of record `name` was stored
    fn put_local_path(&self, name: &str, path: &str);

    /// Looks up the record an asset URL belongs to
    fn owner_of_asset(&self, url: &str) -> Option<String>;

    /// Looks up the stored path for a record
    fn local_path_of(&self, name: &str) -> Option<String>;

    /// Copies the current contents for reporting
    fn snapshot(&self) -> StoreSnapshot;
}
