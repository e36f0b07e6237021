//! Where documents come from.
//!
//! A [`DocumentSource`] lists document keys (slash-separated paths relative
//! to the root) and reads their bytes. The scanner only ever sees keys that
//! pass [`is_indexable`].

use crate::error::{IndexerError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Root-level directories that hold build output rather than documents
const SKIPPED_ROOT_DIRS: &[&str] = &["index", "data"];

/// Translated copies of documents carry this suffix
const TRANSLATION_SUFFIX: &str = "-en.json";

/// One listed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub key: String,
    pub len: u64,
    /// Modification time in milliseconds, or a revision counter for sources
    /// without timestamps
    pub modified: i64,
}

#[async_trait]
pub trait DocumentSource: Debug + Send + Sync {
    /// All indexable documents, sorted by key.
    async fn list(&self) -> Result<Vec<SourceEntry>>;

    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Stable name of the root, used as the rebuild lock key
    fn location(&self) -> String;
}

/// Whether a key names a document the scanner should look at.
pub fn is_indexable(key: &str) -> bool {
    if !key.ends_with(".json") || key.ends_with(TRANSLATION_SUFFIX) {
        return false;
    }
    match key.split_once('/') {
        Some((first, _)) => !SKIPPED_ROOT_DIRS.contains(&first),
        None => true,
    }
}

/// Digest of the listing (keys, sizes, modification times). Changes whenever
/// a document is added, removed or rewritten.
pub async fn fingerprint(source: &dyn DocumentSource) -> Result<String> {
    let entries = source.list().await?;
    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update(entry.key.as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.len.to_be_bytes());
        hasher.update(entry.modified.to_be_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Documents in a directory tree
#[derive(Debug, Clone)]
pub struct FileDocumentSource {
    root: PathBuf,
}

impl FileDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl DocumentSource for FileDocumentSource {
    async fn list(&self) -> Result<Vec<SourceEntry>> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Err(IndexerError::source_failed(format!(
                "document root {} does not exist",
                self.root.display()
            )));
        }

        let mut entries = Vec::new();
        let mut dirs_to_visit = vec![self.root.clone()];

        while let Some(dir) = dirs_to_visit.pop() {
            let mut dir_entries = match tokio::fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(IndexerError::source_failed(format!(
                        "failed to list {}: {}",
                        dir.display(),
                        e
                    )))
                }
            };

            while let Some(entry) = dir_entries.next_entry().await.map_err(|e| {
                IndexerError::source_failed(format!(
                    "failed to read entry in {}: {}",
                    dir.display(),
                    e
                ))
            })? {
                let path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(_) => continue,
                };

                if file_type.is_dir() {
                    let skip = dir == self.root
                        && SKIPPED_ROOT_DIRS
                            .iter()
                            .any(|d| entry.file_name().to_string_lossy() == *d);
                    if !skip {
                        dirs_to_visit.push(path);
                    }
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                if !is_indexable(&key) {
                    continue;
                }

                // A file removed between listing and stat is simply not listed.
                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
                    .unwrap_or(0);
                entries.push(SourceEntry {
                    key,
                    len: meta.len(),
                    modified,
                });
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.root.join(key);
        tokio::fs::read(&path)
            .await
            .map_err(|e| IndexerError::source_failed(format!("failed to read {key}: {e}")))
    }

    fn location(&self) -> String {
        let root = std::fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        format!("file://{}", root.display())
    }
}

/// In-memory documents, for tests and embedding
#[derive(Debug, Clone)]
pub struct MemoryDocumentSource {
    name: String,
    docs: Arc<RwLock<BTreeMap<String, (Vec<u8>, i64)>>>,
    revision: Arc<AtomicI64>,
}

impl MemoryDocumentSource {
    /// `name` distinguishes independent sources for rebuild locking.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: Arc::default(),
            revision: Arc::default(),
        }
    }

    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.docs
            .write()
            .insert(key.into(), (bytes.into(), revision));
    }

    pub fn insert_json(&self, key: impl Into<String>, value: &serde_json::Value) {
        self.insert(key, value.to_string());
    }

    pub fn remove(&self, key: &str) -> bool {
        self.revision.fetch_add(1, Ordering::SeqCst);
        self.docs.write().remove(key).is_some()
    }
}

#[async_trait]
impl DocumentSource for MemoryDocumentSource {
    async fn list(&self) -> Result<Vec<SourceEntry>> {
        let docs = self.docs.read();
        Ok(docs
            .iter()
            .filter(|(key, _)| is_indexable(key))
            .map(|(key, (bytes, revision))| SourceEntry {
                key: key.clone(),
                len: bytes.len() as u64,
                modified: *revision,
            })
            .collect())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.docs
            .read()
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| IndexerError::source_failed(format!("no document {key}")))
    }

    fn location(&self) -> String {
        format!("memory://{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_rules() {
        assert!(is_indexable("catalog.json"));
        assert!(is_indexable("fuji/collection.json"));
        assert!(is_indexable("fuji/tiles/tile-1.json"));
        assert!(is_indexable("fuji/data/x.json"));

        assert!(!is_indexable("index/CURRENT.json"));
        assert!(!is_indexable("data/tile.json"));
        assert!(!is_indexable("fuji/tile-1-en.json"));
        assert!(!is_indexable("fuji/tile-1.laz"));
    }

    #[tokio::test]
    async fn test_file_source_walks_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("fuji/tiles")).unwrap();
        std::fs::create_dir_all(root.join("index/versions")).unwrap();
        std::fs::write(root.join("catalog.json"), b"{}").unwrap();
        std::fs::write(root.join("fuji/collection.json"), b"{}").unwrap();
        std::fs::write(root.join("fuji/tiles/a.json"), b"{}").unwrap();
        std::fs::write(root.join("fuji/tiles/a-en.json"), b"{}").unwrap();
        std::fs::write(root.join("fuji/tiles/a.copc.laz"), b"xx").unwrap();
        std::fs::write(root.join("index/CURRENT.json"), b"{}").unwrap();

        let source = FileDocumentSource::new(root);
        let keys: Vec<String> = source
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(
            keys,
            vec!["catalog.json", "fuji/collection.json", "fuji/tiles/a.json"]
        );
        assert_eq!(source.read("fuji/tiles/a.json").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_missing_root_is_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileDocumentSource::new(dir.path().join("nope"));
        assert!(matches!(
            source.list().await,
            Err(IndexerError::Source(_))
        ));
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_changes() {
        let source = MemoryDocumentSource::new("fp");
        source.insert("a.json", "{}");
        let first = fingerprint(&source).await.unwrap();
        assert_eq!(first, fingerprint(&source).await.unwrap());

        source.insert("a.json", "{}");
        let rewritten = fingerprint(&source).await.unwrap();
        assert_ne!(first, rewritten);

        source.insert("b-en.json", "{}");
        assert_eq!(rewritten, fingerprint(&source).await.unwrap());
    }
}
