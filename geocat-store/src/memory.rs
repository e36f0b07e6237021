//! In-memory index store for tests and embedded use.
//!
//! Besides the [`IndexStore`] contract it exposes switches to simulate an
//! unreachable store and slow loads, and counters for observing how often
//! versions are loaded.

use crate::error::{Result, StoreError};
use crate::manifest::{
    CurrentPointer, PublishStats, StoredVersion, VersionManifest, MANIFEST_FORMAT,
};
use crate::store::IndexStore;
use async_trait::async_trait;
use chrono::Utc;
use geocat_core::{IndexTables, VersionId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryState {
    versions: BTreeMap<VersionId, StoredVersion>,
    current: Option<CurrentPointer>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryIndexStore {
    state: Arc<RwLock<MemoryState>>,
    in_flight: Arc<Mutex<BTreeSet<VersionId>>>,
    unavailable: Arc<AtomicBool>,
    load_delay: Arc<Mutex<Option<Duration>>>,
    loads: Arc<AtomicUsize>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay each `load` by `delay`.
    pub fn set_load_delay(&self, delay: Option<Duration>) {
        *self.load_delay.lock() = delay;
    }

    /// Number of `load` calls that reached the store
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Store a version without moving the pointer
    pub fn insert_unpublished(&self, version: VersionId, tables: IndexTables) {
        let stored = stored_version(version, tables, PublishStats::default());
        self.state.write().versions.insert(version, stored);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store switched off"));
        }
        Ok(())
    }
}

fn stored_version(version: VersionId, tables: IndexTables, stats: PublishStats) -> StoredVersion {
    StoredVersion {
        manifest: VersionManifest {
            format: MANIFEST_FORMAT,
            version,
            created_at: Utc::now(),
            item_count: tables.items.len(),
            collection_count: tables.collections.len(),
            document_errors: stats.document_errors,
            catalog: tables.catalog.clone(),
            files: BTreeMap::new(),
        },
        tables,
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn publish(
        &self,
        version: VersionId,
        tables: &IndexTables,
        stats: PublishStats,
    ) -> Result<CurrentPointer> {
        self.check_available()?;
        tables.validate()?;

        let pointer = CurrentPointer {
            version,
            location: format!("memory://versions/{version}"),
            published_at: Utc::now(),
        };
        let mut state = self.state.write();
        if state.versions.contains_key(&version) {
            return Err(StoreError::VersionExists(version));
        }
        state
            .versions
            .insert(version, stored_version(version, tables.clone(), stats));
        state.current = Some(pointer.clone());
        Ok(pointer)
    }

    async fn read_current(&self) -> Result<Option<CurrentPointer>> {
        self.check_available()?;
        Ok(self.state.read().current.clone())
    }

    async fn load(&self, version: VersionId) -> Result<StoredVersion> {
        self.check_available()?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.load_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;
        self.state
            .read()
            .versions
            .get(&version)
            .cloned()
            .ok_or_else(|| StoreError::not_found(version.to_string()))
    }

    async fn list_versions(&self) -> Result<Vec<VersionId>> {
        self.check_available()?;
        Ok(self.state.read().versions.keys().copied().collect())
    }

    async fn delete_version(&self, version: VersionId) -> Result<()> {
        self.check_available()?;
        if self.in_flight.lock().contains(&version) {
            return Err(StoreError::Protected(version));
        }
        let mut state = self.state.write();
        if state.current.as_ref().map(|c| c.version) == Some(version) {
            return Err(StoreError::Protected(version));
        }
        state
            .versions
            .remove(&version)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(version.to_string()))
    }

    fn in_flight(&self) -> Vec<VersionId> {
        self.in_flight.lock().iter().copied().collect()
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_tables;

    #[tokio::test]
    async fn test_publish_swaps_pointer() {
        let store = MemoryIndexStore::new();
        let v1 = VersionId::generate();
        let v2 = VersionId::generate();
        store
            .publish(v1, &sample_tables(1), PublishStats::default())
            .await
            .unwrap();
        store
            .publish(v2, &sample_tables(2), PublishStats::default())
            .await
            .unwrap();

        assert_eq!(store.read_current().await.unwrap().unwrap().version, v2);
        assert_eq!(store.load(v1).await.unwrap().tables.items.len(), 1);
        assert_eq!(store.load(v2).await.unwrap().tables.items.len(), 2);
        assert_eq!(store.load_count(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_switch() {
        let store = MemoryIndexStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.read_current().await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.read_current().await.unwrap().is_none());
    }
}
