//! The [`IndexStore`] contract

use crate::error::Result;
use crate::manifest::{CurrentPointer, PublishStats, StoredVersion};
use async_trait::async_trait;
use geocat_core::{IndexTables, VersionId};
use std::fmt::Debug;

/// Durable, versioned storage for table snapshots plus the current pointer.
///
/// Implementations guarantee that readers following the pointer only ever
/// see complete versions: the pointer moves after every file of the new
/// version has been written, and a failed publish leaves it untouched.
#[async_trait]
pub trait IndexStore: Debug + Send + Sync {
    /// Write `tables` under `version` (which must not have been used
    /// before), then atomically point readers at it.
    async fn publish(
        &self,
        version: VersionId,
        tables: &IndexTables,
        stats: PublishStats,
    ) -> Result<CurrentPointer>;

    /// The pointer readers should follow, or `None` before the first publish.
    async fn read_current(&self) -> Result<Option<CurrentPointer>>;

    /// Load and verify a version.
    async fn load(&self, version: VersionId) -> Result<StoredVersion>;

    /// All stored versions, oldest first.
    async fn list_versions(&self) -> Result<Vec<VersionId>>;

    /// Remove a version. Fails with `Protected` for the current version and
    /// for versions still being written.
    async fn delete_version(&self, version: VersionId) -> Result<()>;

    /// Versions whose publish has started but not yet finished
    fn in_flight(&self) -> Vec<VersionId>;

    /// Human-readable location of the store, used as a lock key and in logs
    fn location(&self) -> String;
}
