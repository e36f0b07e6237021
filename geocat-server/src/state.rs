//! Application state management
//!
//! One [`AppState`] is shared by every handler. It owns the query engine
//! (with its cache), the handle to the rebuild worker when a catalog root is
//! configured, and the cancellation token that stops background tasks.

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::telemetry::TelemetryConfig;
use geocat_core::{Clock, SystemClock};
use geocat_crs::CrsRegistry;
use geocat_indexer::{
    spawn_poll_watcher, DocumentSource, FileDocumentSource, Indexer, RebuildHandle,
    RebuildWorker,
};
use geocat_query::{IndexCache, QueryEngine};
use geocat_store::{FileIndexStore, IndexStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared application state
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,

    /// Telemetry configuration
    pub telemetry_config: TelemetryConfig,

    /// Server start time for uptime tracking
    pub start_time: Instant,

    pub engine: QueryEngine,

    pub store: Arc<dyn IndexStore>,

    /// Rebuild requests (None when no catalog root is configured)
    pub rebuild: Option<RebuildHandle>,

    source: Option<Arc<dyn DocumentSource>>,

    /// Worker waiting to be spawned by [`start_background_tasks`](Self::start_background_tasks)
    worker: Mutex<Option<RebuildWorker>>,

    /// Cancelled on shutdown; parent of every background task's token
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store.location())
            .field("rebuilds_enabled", &self.rebuild.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// File-backed state from config: the index store at `index_path` and,
    /// when set, the document tree at `catalog_path`.
    pub fn new(config: ServerConfig, telemetry_config: TelemetryConfig) -> Result<Self> {
        let store: Arc<dyn IndexStore> = Arc::new(FileIndexStore::new(&config.index_path));
        let source = config
            .catalog_path
            .as_ref()
            .map(|root| Arc::new(FileDocumentSource::new(root)) as Arc<dyn DocumentSource>);
        Self::from_parts(config, telemetry_config, store, source, Arc::new(SystemClock))
    }

    /// State over explicit store, document source and clock.
    pub fn from_parts(
        config: ServerConfig,
        telemetry_config: TelemetryConfig,
        store: Arc<dyn IndexStore>,
        source: Option<Arc<dyn DocumentSource>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ServerError::Config(format!("Invalid configuration: {e}")))?;

        let registry = match &config.crs_registry {
            Some(path) => CrsRegistry::from_path(path)?,
            None => CrsRegistry::builtin()?,
        };

        let cache = IndexCache::with_options(
            store.clone(),
            clock.clone(),
            config.cache_ttl(),
            config.reload_timeout(),
        );
        let engine = QueryEngine::new(cache, Arc::new(registry), config.query_limits());

        let shutdown = CancellationToken::new();
        let (rebuild, worker) = match &source {
            Some(source) => {
                let indexer = Indexer::new(source.clone(), store.clone())
                    .with_retention(config.retention())
                    .with_clock(clock);
                let (worker, handle) = RebuildWorker::new(indexer, shutdown.child_token());
                (Some(handle), Some(worker))
            }
            None => (None, None),
        };

        Ok(Self {
            config,
            telemetry_config,
            start_time: Instant::now(),
            engine,
            store,
            rebuild,
            source,
            worker: Mutex::new(worker),
            shutdown,
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn registry(&self) -> &Arc<CrsRegistry> {
        self.engine.registry()
    }

    /// Spawn the rebuild worker and, if configured, the change poller.
    /// Only the first call spawns anything.
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        let Some(worker) = self.worker.lock().take() else {
            return tasks;
        };
        tasks.push(tokio::spawn(worker.run()));

        if let (Some(source), Some(handle)) = (&self.source, &self.rebuild) {
            if let Some(interval) = self.config.poll_interval() {
                tasks.push(spawn_poll_watcher(
                    source.clone(),
                    handle.clone(),
                    interval,
                    self.shutdown.child_token(),
                ));
            }
            if self.config.rebuild_on_start {
                tracing::info!("rebuild on start requested");
                // Outcome is logged by the worker and shown on /health.
                drop(handle.trigger());
            }
        }
        tasks
    }

    /// Stop background tasks
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
