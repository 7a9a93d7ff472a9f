//! In-memory lookup store

use crate::storage::traits::LookupStore;
use crate::storage::StoreSnapshot;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct Tables {
    tags: HashMap<String, Vec<String>>,
    asset_refs: HashMap<String, String>,
    local_assets: HashMap<String, String>,
}

/// Lookup store kept entirely in memory for the lifetime of one run
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer cannot leave a half-applied single-key upsert behind,
    // so a poisoned lock is still safe to use.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LookupStore for InMemoryStore {
    fn put_tag(&self, tag: &str, name: &str) {
        self.write()
            .tags
            .entry(tag.to_string())
            .or_default()
            .push(name.to_string());
    }

    fn put_asset_ref(&self, url: &str, name: &str) {
        let previous = self
            .write()
            .asset_refs
            .insert(url.to_string(), name.to_string());
        if let Some(previous) = previous.filter(|p| p != name) {
            tracing::debug!(url, previous = %previous, owner = name, "Asset reference reassigned");
        }
    }

    fn put_local_path(&self, name: &str, path: &str) {
        self.write()
            .local_assets
            .insert(name.to_string(), path.to_string());
    }

    fn owner_of_asset(&self, url: &str) -> Option<String> {
        self.read().asset_refs.get(url).cloned()
    }

    fn local_path_of(&self, name: &str) -> Option<String> {
        self.read().local_assets.get(name).cloned()
    }

    fn snapshot(&self) -> StoreSnapshot {
        let tables = self.read();
        StoreSnapshot {
            tags: tables
                .tags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            asset_refs: tables
                .asset_refs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            local_assets: tables
                .local_assets
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_tags_keep_order_and_duplicates() {
        let store = InMemoryStore::new();
        store.put_tag("feline", "Lion");
        store.put_tag("feline", "Cat");
        store.put_tag("feline", "Lion");

        let snapshot = store.snapshot();
        assert_eq!(snapshot.tags["feline"], vec!["Lion", "Cat", "Lion"]);
    }

    #[test]
    fn test_asset_ref_last_write_wins() {
        let store = InMemoryStore::new();
        store.put_asset_ref("https://x/a.jpg", "Lion");
        store.put_asset_ref("https://x/a.jpg", "Tiger");

        assert_eq!(store.owner_of_asset("https://x/a.jpg").as_deref(), Some("Tiger"));
        assert_eq!(store.snapshot().asset_refs.len(), 1);
    }

    #[test]
    fn test_unknown_asset_is_absent() {
        let store = InMemoryStore::new();
        assert_eq!(store.owner_of_asset("https://x/missing.jpg"), None);
        assert_eq!(store.local_path_of("Nobody"), None);
    }

    #[test]
    fn test_local_path_upsert() {
        let store = InMemoryStore::new();
        store.put_local_path("Lion", "/tmp/old/Lion.jpg");
        store.put_local_path("Lion", "/tmp/Lion.jpg");
        assert_eq!(store.local_path_of("Lion").as_deref(), Some("/tmp/Lion.jpg"));
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(InMemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        store.put_tag("shared", &format!("r{}-{}", i, j));
                        store.put_asset_ref(&format!("https://x/{}-{}.jpg", i, j), "owner");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.tags["shared"].len(), 400);
        assert_eq!(snapshot.asset_refs.len(), 400);
    }
}
