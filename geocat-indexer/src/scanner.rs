//! Document scanning.
//!
//! The scanner reads every indexable document, converts it to a row and
//! assembles one [`IndexTables`] value. A bad document never fails the scan:
//! it becomes a [`DocumentError`] and is left out of the tables. Output is a
//! function of the document set alone, so scanning unchanged input twice
//! yields equal tables.

use crate::error::{IndexerError, Result};
use crate::source::DocumentSource;
use geocat_core::{CatalogMeta, CollectionRow, Document, IndexTables, ItemDoc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A document that could not be indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentError {
    pub key: String,
    pub message: String,
}

impl DocumentError {
    fn new(key: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(key = %key, error = %message, "skipping document");
        Self {
            key: key.to_string(),
            message,
        }
    }
}

/// Result of one scan
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub tables: IndexTables,
    pub errors: Vec<DocumentError>,
    /// Number of documents read
    pub documents: usize,
}

fn parent_dir(key: &str) -> &str {
    key.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Scan every document in `source`.
///
/// Checks `cancel` between documents. Fails with
/// [`IndexerError::NoDocuments`] when no collection or item survived.
pub async fn scan(source: &dyn DocumentSource, cancel: &CancellationToken) -> Result<ScanOutput> {
    let entries = source.list().await?;
    let mut output = ScanOutput::default();

    let mut catalogs: Vec<(String, CatalogMeta)> = Vec::new();
    let mut collections: Vec<(String, CollectionRow)> = Vec::new();
    let mut items: Vec<(String, ItemDoc)> = Vec::new();

    for entry in &entries {
        if cancel.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }
        let bytes = match source.read(&entry.key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                output.errors.push(DocumentError::new(&entry.key, e.to_string()));
                continue;
            }
        };
        output.documents += 1;

        match Document::from_slice(&bytes) {
            Ok(Some(Document::Catalog(doc))) => match doc.into_meta() {
                Ok(meta) => catalogs.push((entry.key.clone(), meta)),
                Err(e) => output.errors.push(DocumentError::new(&entry.key, e.to_string())),
            },
            Ok(Some(Document::Collection(doc))) => match doc.into_row() {
                Ok(row) => collections.push((entry.key.clone(), row)),
                Err(e) => output.errors.push(DocumentError::new(&entry.key, e.to_string())),
            },
            Ok(Some(Document::Item(doc))) => items.push((entry.key.clone(), doc)),
            Ok(None) => debug!(key = %entry.key, "not a catalog document"),
            Err(e) => output.errors.push(DocumentError::new(&entry.key, e.to_string())),
        }
    }

    // The root-most catalog wins; keys are sorted, so ties go to the first.
    output.tables.catalog = catalogs
        .into_iter()
        .min_by_key(|(key, _)| key.matches('/').count())
        .map(|(_, meta)| meta);

    // Collections: first document per id wins, later ones are errors.
    let mut collection_ids: HashSet<String> = HashSet::new();
    let mut collection_by_dir: BTreeMap<String, String> = BTreeMap::new();
    for (key, row) in collections {
        if !collection_ids.insert(row.id.clone()) {
            output.errors.push(DocumentError::new(
                &key,
                format!("duplicate collection id '{}'", row.id),
            ));
            continue;
        }
        collection_by_dir
            .entry(parent_dir(&key).to_string())
            .or_insert_with(|| row.id.clone());
        debug!(key = %key, collection = %row.id, "indexed collection");
        output.tables.collections.push(row);
    }

    let mut seen_items: HashMap<String, HashSet<String>> = HashMap::new();
    for (key, doc) in items {
        let inferred = infer_collection(&collection_by_dir, &key);
        let row = match doc.into_row(inferred) {
            Ok(row) => row,
            Err(e) => {
                output.errors.push(DocumentError::new(&key, e.to_string()));
                continue;
            }
        };
        if !collection_ids.contains(&row.collection) {
            output.errors.push(DocumentError::new(
                &key,
                format!(
                    "item '{}' references unknown collection '{}'",
                    row.id, row.collection
                ),
            ));
            continue;
        }
        if !seen_items
            .entry(row.collection.clone())
            .or_default()
            .insert(row.id.clone())
        {
            output.errors.push(DocumentError::new(
                &key,
                format!(
                    "duplicate item id '{}' in collection '{}'",
                    row.id, row.collection
                ),
            ));
            continue;
        }
        debug!(key = %key, collection = %row.collection, item = %row.id, "indexed item");
        output.tables.items.push(row);
    }

    output.tables.normalize();
    if output.tables.is_empty() {
        return Err(IndexerError::NoDocuments {
            errors: output.errors.len(),
        });
    }
    Ok(output)
}

/// Collection declared in the item's directory, else its parent directory.
fn infer_collection<'a>(by_dir: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    let dir = parent_dir(key);
    by_dir
        .get(dir)
        .or_else(|| {
            if dir.is_empty() {
                None
            } else {
                by_dir.get(parent_dir(dir))
            }
        })
        .map(String::as_str)
}
