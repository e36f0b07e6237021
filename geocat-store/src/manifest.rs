//! Version manifest and current-version pointer

use chrono::{DateTime, Utc};
use geocat_core::{CatalogMeta, IndexTables, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Manifest format written by this crate
pub const MANIFEST_FORMAT: u32 = 1;

/// The pointer naming the version readers should load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPointer {
    pub version: VersionId,
    /// Backend-specific location of the version's files
    pub location: String,
    pub published_at: DateTime<Utc>,
}

/// Checksum entry for one column file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub sha256: String,
    pub bytes: u64,
}

/// Facts about a rebuild recorded alongside its tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishStats {
    pub document_errors: usize,
}

/// Describes one published version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    pub format: u32,
    pub version: VersionId,
    pub created_at: DateTime<Utc>,
    pub item_count: usize,
    pub collection_count: usize,
    pub document_errors: usize,
    pub catalog: Option<CatalogMeta>,
    /// Column files by name
    pub files: BTreeMap<String, FileEntry>,
}

/// A version as loaded back from the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVersion {
    pub manifest: VersionManifest,
    pub tables: IndexTables,
}
