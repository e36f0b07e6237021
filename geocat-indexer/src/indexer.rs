//! Scan, publish, collect garbage.

use crate::error::Result;
use crate::scanner::{scan, DocumentError};
use crate::source::DocumentSource;
use geocat_core::{Clock, SystemClock, VersionId};
use geocat_store::{collect_garbage, IndexStore, PublishStats, RetentionPolicy};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type RootLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

static ROOT_LOCKS: OnceLock<RootLocks> = OnceLock::new();

/// Process-wide rebuild lock for a document root.
///
/// Every rebuild of the same root location holds this lock for its whole
/// duration, so at most one runs at a time no matter how many indexers or
/// workers point at the root.
pub fn root_lock(location: &str) -> Arc<tokio::sync::Mutex<()>> {
    ROOT_LOCKS
        .get_or_init(Default::default)
        .lock()
        .entry(location.to_string())
        .or_default()
        .clone()
}

/// What a successful rebuild produced
#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub version: VersionId,
    pub items: usize,
    pub collections: usize,
    pub document_errors: Vec<DocumentError>,
    /// Superseded versions removed by retention after publishing
    pub versions_deleted: usize,
    pub duration: Duration,
}

/// Compiles the documents of one root into a published table version
#[derive(Debug, Clone)]
pub struct Indexer {
    source: Arc<dyn DocumentSource>,
    store: Arc<dyn IndexStore>,
    retention: RetentionPolicy,
    clock: Arc<dyn Clock>,
}

impl Indexer {
    pub fn new(source: Arc<dyn DocumentSource>, store: Arc<dyn IndexStore>) -> Self {
        Self {
            source,
            store,
            retention: RetentionPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn source(&self) -> &Arc<dyn DocumentSource> {
        &self.source
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Rebuild and publish a new version.
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        self.rebuild_with_cancel(&CancellationToken::new()).await
    }

    /// Rebuild, checking `cancel` between documents. A cancelled or failed
    /// rebuild publishes nothing and leaves the current version in place.
    pub async fn rebuild_with_cancel(&self, cancel: &CancellationToken) -> Result<RebuildReport> {
        let location = self.source.location();
        let lock = root_lock(&location);
        let _guard = lock.lock().await;

        let started = Instant::now();
        info!(root = %location, store = %self.store.location(), "rebuild started");

        let output = scan(self.source.as_ref(), cancel).await?;
        let version = VersionId::generate();
        let stats = PublishStats {
            document_errors: output.errors.len(),
        };
        self.store.publish(version, &output.tables, stats).await?;

        let versions_deleted =
            match collect_garbage(self.store.as_ref(), &self.retention, self.clock.now()).await {
                Ok(gc) => gc.deleted.len(),
                Err(e) => {
                    warn!(error = %e, "retention pass failed; superseded versions kept");
                    0
                }
            };

        let report = RebuildReport {
            version,
            items: output.tables.items.len(),
            collections: output.tables.collections.len(),
            document_errors: output.errors,
            versions_deleted,
            duration: started.elapsed(),
        };
        info!(
            version = %report.version,
            items = report.items,
            collections = report.collections,
            document_errors = report.document_errors.len(),
            versions_deleted = report.versions_deleted,
            elapsed_ms = report.duration.as_millis() as u64,
            "rebuild published"
        );
        Ok(report)
    }
}
