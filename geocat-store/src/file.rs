//! File-backed index store.
//!
//! Layout under the store root:
//! - `versions/{version}/items.col` - item table columns
//! - `versions/{version}/collections.col` - collection table columns
//! - `versions/{version}/manifest.json` - counts, catalog metadata, checksums
//! - `CURRENT.json` - pointer to the current version
//!
//! Every file is written to a `.tmp` sibling and renamed into place, and the
//! pointer is only rewritten after the whole version directory is complete.

use crate::codec;
use crate::error::{Result, StoreError};
use crate::manifest::{
    CurrentPointer, FileEntry, PublishStats, StoredVersion, VersionManifest, MANIFEST_FORMAT,
};
use crate::store::IndexStore;
use async_trait::async_trait;
use chrono::Utc;
use geocat_core::{IndexTables, VersionId};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const VERSIONS_DIR: &str = "versions";
const CURRENT_FILE: &str = "CURRENT.json";
const MANIFEST_FILE: &str = "manifest.json";
pub const ITEMS_FILE: &str = "items.col";
pub const COLLECTIONS_FILE: &str = "collections.col";

type InFlightSet = Arc<Mutex<BTreeSet<VersionId>>>;

/// Removes a version from the in-flight set when its publish ends,
/// successfully or not.
struct InFlightGuard {
    set: InFlightSet,
    version: VersionId,
}

impl InFlightGuard {
    fn register(set: &InFlightSet, version: VersionId) -> Self {
        set.lock().insert(version);
        Self {
            set: set.clone(),
            version,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.version);
    }
}

#[derive(Debug)]
pub struct FileIndexStore {
    root: PathBuf,
    /// Serializes pointer swaps against deletions
    pointer_lock: tokio::sync::Mutex<()>,
    in_flight: InFlightSet,
}

impl FileIndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pointer_lock: tokio::sync::Mutex::new(()),
            in_flight: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn versions_dir(&self) -> PathBuf {
        self.root.join(VERSIONS_DIR)
    }

    fn version_dir(&self, version: VersionId) -> PathBuf {
        self.versions_dir().join(version.to_string())
    }

    fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_FILE)
    }

    async fn write_version(
        &self,
        dir: &Path,
        version: VersionId,
        tables: &IndexTables,
        stats: PublishStats,
    ) -> Result<()> {
        tables.validate()?;
        tokio::fs::create_dir_all(dir).await?;

        let mut files = BTreeMap::new();
        for (name, bytes) in [
            (ITEMS_FILE, codec::encode_items(&tables.items)?),
            (COLLECTIONS_FILE, codec::encode_collections(&tables.collections)?),
        ] {
            write_bytes_atomic(&dir.join(name), &bytes).await?;
            files.insert(
                name.to_string(),
                FileEntry {
                    sha256: sha256_hex(&bytes),
                    bytes: bytes.len() as u64,
                },
            );
        }

        let manifest = VersionManifest {
            format: MANIFEST_FORMAT,
            version,
            created_at: Utc::now(),
            item_count: tables.items.len(),
            collection_count: tables.collections.len(),
            document_errors: stats.document_errors,
            catalog: tables.catalog.clone(),
            files,
        };
        write_json_atomic(&dir.join(MANIFEST_FILE), &manifest).await
    }

    async fn read_column(dir: &Path, manifest: &VersionManifest, name: &str) -> Result<Vec<u8>> {
        let entry = manifest
            .files
            .get(name)
            .ok_or_else(|| StoreError::corrupt(format!("manifest lists no {name}")))?;
        let bytes = tokio::fs::read(dir.join(name)).await?;
        let actual = sha256_hex(&bytes);
        if actual != entry.sha256 {
            return Err(StoreError::corrupt(format!(
                "{name} checksum mismatch: expected {}, found {actual}",
                entry.sha256
            )));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl IndexStore for FileIndexStore {
    async fn publish(
        &self,
        version: VersionId,
        tables: &IndexTables,
        stats: PublishStats,
    ) -> Result<CurrentPointer> {
        let _in_flight = InFlightGuard::register(&self.in_flight, version);
        let dir = self.version_dir(version);

        if tokio::fs::try_exists(&dir).await? {
            return Err(StoreError::VersionExists(version));
        }

        if let Err(e) = self.write_version(&dir, version, tables, stats).await {
            warn!(version = %version, error = %e, "Publish failed, removing partial version");
            remove_unpublished(&dir, version).await;
            return Err(e);
        }

        let pointer = CurrentPointer {
            version,
            location: dir.display().to_string(),
            published_at: Utc::now(),
        };
        {
            let _lock = self.pointer_lock.lock().await;
            if let Err(e) = write_json_atomic(&self.current_path(), &pointer).await {
                // Not yet referenced by anyone; retention would keep it forever.
                warn!(version = %version, error = %e, "Pointer update failed, removing version");
                remove_unpublished(&dir, version).await;
                return Err(e);
            }
        }

        info!(
            version = %version,
            items = tables.items.len(),
            collections = tables.collections.len(),
            "Published index version"
        );
        Ok(pointer)
    }

    async fn read_current(&self) -> Result<Option<CurrentPointer>> {
        read_json(&self.current_path()).await
    }

    async fn load(&self, version: VersionId) -> Result<StoredVersion> {
        let dir = self.version_dir(version);
        let manifest: VersionManifest = read_json(&dir.join(MANIFEST_FILE))
            .await?
            .ok_or_else(|| StoreError::not_found(version.to_string()))?;
        if manifest.version != version {
            return Err(StoreError::corrupt(format!(
                "manifest in {} names version {}",
                dir.display(),
                manifest.version
            )));
        }

        let items = codec::decode_items(&Self::read_column(&dir, &manifest, ITEMS_FILE).await?)?;
        let collections = codec::decode_collections(
            &Self::read_column(&dir, &manifest, COLLECTIONS_FILE).await?,
        )?;
        if items.len() != manifest.item_count || collections.len() != manifest.collection_count {
            return Err(StoreError::corrupt(format!(
                "row counts differ from manifest for version {version}"
            )));
        }

        let tables = IndexTables {
            catalog: manifest.catalog.clone(),
            collections,
            items,
        };
        tables
            .validate()
            .map_err(|e| StoreError::corrupt(e.to_string()))?;

        debug!(version = %version, items = tables.items.len(), "Loaded index version");
        Ok(StoredVersion { manifest, tables })
    }

    async fn list_versions(&self) -> Result<Vec<VersionId>> {
        let dir = self.versions_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_string_lossy().parse::<VersionId>() {
                Ok(v) => versions.push(v),
                Err(_) => debug!(name = ?name, "Ignoring non-version directory"),
            }
        }
        versions.sort();
        Ok(versions)
    }

    async fn delete_version(&self, version: VersionId) -> Result<()> {
        let _lock = self.pointer_lock.lock().await;
        if self.in_flight.lock().contains(&version) {
            return Err(StoreError::Protected(version));
        }
        if let Some(current) = self.read_current().await? {
            if current.version == version {
                return Err(StoreError::Protected(version));
            }
        }

        match tokio::fs::remove_dir_all(self.version_dir(version)).await {
            Ok(()) => {
                debug!(version = %version, "Deleted index version");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(version.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn in_flight(&self) -> Vec<VersionId> {
        self.in_flight.lock().iter().copied().collect()
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Read and parse a JSON file; `None` if it does not exist
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_unpublished(dir: &Path, version: VersionId) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(version = %version, error = %e, "Failed to remove unpublished version");
        }
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &content).await
}

/// Write to a `.tmp` sibling, sync, then rename over the target.
async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
