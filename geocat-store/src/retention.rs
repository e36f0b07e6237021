//! Retention of superseded versions.
//!
//! A superseded version is deleted only when both thresholds are passed: it
//! is older than the newest `keep_last` superseded versions, and it was
//! created more than `keep_for` ago. The current version and versions still
//! being written are never deleted.

use crate::error::{Result, StoreError};
use crate::store::IndexStore;
use chrono::{DateTime, Utc};
use geocat_core::VersionId;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default number of superseded versions to keep
pub const DEFAULT_KEEP_LAST: usize = 5;

/// Default minimum age before a superseded version may be deleted
pub const DEFAULT_KEEP_FOR: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_last: usize,
    pub keep_for: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_last: DEFAULT_KEEP_LAST,
            keep_for: DEFAULT_KEEP_FOR,
        }
    }
}

/// Outcome of a collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub deleted: Vec<VersionId>,
    pub retained: usize,
}

/// Delete superseded versions that fall outside `policy`.
pub async fn collect_garbage(
    store: &dyn IndexStore,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<GcReport> {
    let current = store.read_current().await?.map(|p| p.version);
    let in_flight = store.in_flight();
    let keep_for_ms = u64::try_from(policy.keep_for.as_millis()).unwrap_or(u64::MAX);
    let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);

    // Newest first, so the first `keep_last` superseded versions are kept.
    let mut versions = store.list_versions().await?;
    versions.reverse();

    let mut report = GcReport::default();
    let mut superseded_seen = 0usize;
    for version in versions {
        if Some(version) == current || in_flight.contains(&version) {
            report.retained += 1;
            continue;
        }
        // Versions newer than the pointer belong to a publish in progress.
        if current.map_or(true, |c| version > c) {
            report.retained += 1;
            continue;
        }

        superseded_seen += 1;
        let age_ms = now_ms.saturating_sub(version.timestamp_ms());
        if superseded_seen <= policy.keep_last || age_ms < keep_for_ms {
            report.retained += 1;
            continue;
        }

        match store.delete_version(version).await {
            Ok(()) => report.deleted.push(version),
            Err(StoreError::Protected(_)) | Err(StoreError::NotFound(_)) => {
                debug!(version = %version, "Version became protected or vanished, skipping");
                report.retained += 1;
            }
            Err(e) => {
                warn!(version = %version, error = %e, "Failed to delete superseded version");
                return Err(e);
            }
        }
    }

    if !report.deleted.is_empty() {
        info!(
            deleted = report.deleted.len(),
            retained = report.retained,
            "Collected superseded index versions"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PublishStats;
    use crate::memory::MemoryIndexStore;
    use crate::test_support::sample_tables;

    async fn publish_n(store: &MemoryIndexStore, n: usize) -> Vec<VersionId> {
        let mut out = Vec::new();
        for _ in 0..n {
            let v = VersionId::generate();
            store
                .publish(v, &sample_tables(1), PublishStats::default())
                .await
                .unwrap();
            out.push(v);
        }
        out
    }

    #[tokio::test]
    async fn test_keeps_last_n_and_current() {
        let store = MemoryIndexStore::new();
        let versions = publish_n(&store, 5).await;
        let policy = RetentionPolicy {
            keep_last: 2,
            keep_for: Duration::ZERO,
        };
        let later = Utc::now() + chrono::Duration::hours(1);

        let report = collect_garbage(&store, &policy, later).await.unwrap();
        assert_eq!(report.deleted, vec![versions[1], versions[0]]);
        assert_eq!(
            store.list_versions().await.unwrap(),
            versions[2..].to_vec()
        );
    }

    #[tokio::test]
    async fn test_young_versions_survive() {
        let store = MemoryIndexStore::new();
        publish_n(&store, 4).await;
        let policy = RetentionPolicy {
            keep_last: 0,
            keep_for: Duration::from_secs(30 * 60),
        };

        let report = collect_garbage(&store, &policy, Utc::now()).await.unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(store.list_versions().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_never_deletes_current() {
        let store = MemoryIndexStore::new();
        let versions = publish_n(&store, 3).await;
        let policy = RetentionPolicy {
            keep_last: 0,
            keep_for: Duration::ZERO,
        };
        let later = Utc::now() + chrono::Duration::hours(1);

        collect_garbage(&store, &policy, later).await.unwrap();
        assert_eq!(store.list_versions().await.unwrap(), vec![versions[2]]);
        assert_eq!(
            store.read_current().await.unwrap().unwrap().version,
            versions[2]
        );
    }

    #[tokio::test]
    async fn test_versions_newer_than_pointer_are_kept() {
        let store = MemoryIndexStore::new();
        let versions = publish_n(&store, 2).await;
        // Simulate a version written but not yet pointed at.
        let pending = VersionId::generate();
        store.insert_unpublished(pending, sample_tables(1));
        let policy = RetentionPolicy {
            keep_last: 0,
            keep_for: Duration::ZERO,
        };
        let later = Utc::now() + chrono::Duration::hours(1);

        let report = collect_garbage(&store, &policy, later).await.unwrap();
        assert_eq!(report.deleted, vec![versions[0]]);
        assert!(store.list_versions().await.unwrap().contains(&pending));
    }
}
