//! Freshness-bounded snapshot cache.
//!
//! [`IndexCache::get`] serves the cached snapshot while it is younger than
//! the TTL and otherwise reloads it. Reloads are single-flight: the first
//! caller starts one reload task and everyone arriving before it finishes
//! waits on that same task. Readers only ever hold an `Arc` to a complete
//! snapshot; the lock is taken just to swap it.
//!
//! [`IndexCache::force_refresh`] must observe every version published before
//! it was called. A forced caller that finds a reload already running may have
//! missed that reload's pointer read, so it waits for one follow-up reload
//! instead; all forced callers arriving during the same run share it.
//!
//! A failed or timed-out reload keeps the previous entry and records the
//! error for health reporting. Only a cache that never loaded anything
//! fails reads, with [`QueryError::Unavailable`].

use crate::error::{QueryError, Result};
use crate::snapshot::IndexSnapshot;
use chrono::{DateTime, Utc};
use geocat_core::{Clock, SystemClock, VersionId};
use geocat_store::IndexStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// A loaded snapshot and when it was last confirmed current
#[derive(Debug)]
pub struct CacheEntry {
    pub version: VersionId,
    pub snapshot: Arc<IndexSnapshot>,
    pub loaded_at: DateTime<Utc>,
}

/// Point-in-time view of the cache, for health reporting
#[derive(Debug, Clone)]
pub struct CacheStatus {
    pub version: Option<VersionId>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub items: usize,
    pub collections: usize,
    pub document_errors: usize,
    /// Error of the most recent reload, cleared by the next success
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub reloads: u64,
    pub reloading: bool,
}

type ReloadResult = Result<Arc<CacheEntry>>;

type Waiter = oneshot::Sender<ReloadResult>;

/// A running reload and who is waiting on it
#[derive(Default)]
struct Reload {
    waiters: Vec<Waiter>,
    /// Forced refreshes that joined after the run started; served by a
    /// second run once this one finishes
    follow_up: Vec<Waiter>,
}

#[derive(Default)]
struct CacheState {
    entry: Option<Arc<CacheEntry>>,
    /// `Some` while a reload task runs
    reloading: Option<Reload>,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    reloads: u64,
}

struct CacheInner {
    store: Arc<dyn IndexStore>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    reload_timeout: Duration,
    state: Mutex<CacheState>,
}

/// Cheaply cloneable handle to the shared cache
#[derive(Clone)]
pub struct IndexCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("store", &self.inner.store.location())
            .field("ttl", &self.inner.ttl)
            .field("reload_timeout", &self.inner.reload_timeout)
            .finish_non_exhaustive()
    }
}

impl IndexCache {
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self::with_options(
            store,
            Arc::new(SystemClock),
            DEFAULT_TTL,
            DEFAULT_RELOAD_TIMEOUT,
        )
    }

    pub fn with_options(
        store: Arc<dyn IndexStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        reload_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                clock,
                ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
                reload_timeout,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// The cached entry if fresh, otherwise the result of a reload. Falls
    /// back to the stale entry when the reload fails.
    pub async fn get(&self) -> Result<Arc<CacheEntry>> {
        let rx = {
            let mut state = self.inner.state.lock();
            if let Some(entry) = &state.entry {
                if self.inner.clock.now() - entry.loaded_at < self.inner.ttl {
                    return Ok(entry.clone());
                }
            }
            self.join_or_start_reload(&mut state, false)
        };

        match rx.await {
            Ok(Ok(entry)) => Ok(entry),
            Ok(Err(e)) => self.current().ok_or(e),
            Err(_) => self
                .current()
                .ok_or_else(|| QueryError::unavailable("reload abandoned")),
        }
    }

    /// Reload now regardless of age and reset the TTL. The result reflects
    /// every version published before the call. Unlike [`get`](Self::get), a
    /// failure is returned to the caller (the previous entry is still kept).
    pub async fn force_refresh(&self) -> Result<Arc<CacheEntry>> {
        let rx = {
            let mut state = self.inner.state.lock();
            self.join_or_start_reload(&mut state, true)
        };
        rx.await
            .unwrap_or_else(|_| Err(QueryError::unavailable("reload abandoned")))
    }

    /// The cached entry regardless of age, without reloading
    pub fn current(&self) -> Option<Arc<CacheEntry>> {
        self.inner.state.lock().entry.clone()
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl.to_std().unwrap_or(Duration::MAX)
    }

    pub fn status(&self) -> CacheStatus {
        let state = self.inner.state.lock();
        let entry = state.entry.as_ref();
        CacheStatus {
            version: entry.map(|e| e.version),
            loaded_at: entry.map(|e| e.loaded_at),
            items: entry.map_or(0, |e| e.snapshot.item_count()),
            collections: entry.map_or(0, |e| e.snapshot.collections().len()),
            document_errors: entry.map_or(0, |e| e.snapshot.document_errors()),
            last_error: state.last_error.clone(),
            last_error_at: state.last_error_at,
            reloads: state.reloads,
            reloading: state.reloading.is_some(),
        }
    }

    fn join_or_start_reload(
        &self,
        state: &mut CacheState,
        forced: bool,
    ) -> oneshot::Receiver<ReloadResult> {
        let (tx, rx) = oneshot::channel();
        match &mut state.reloading {
            Some(reload) if forced => reload.follow_up.push(tx),
            Some(reload) => reload.waiters.push(tx),
            None => self.start_reload(state, vec![tx]),
        }
        rx
    }

    fn start_reload(&self, state: &mut CacheState, waiters: Vec<Waiter>) {
        state.reloading = Some(Reload {
            waiters,
            follow_up: Vec::new(),
        });
        // The reload runs in its own task so a caller that goes away cannot
        // strand the other waiters.
        let this = self.clone();
        let previous = state.entry.clone();
        tokio::spawn(async move {
            let guard = ReloadGuard {
                cache: this.clone(),
                finished: false,
            };
            this.reload(previous).await;
            guard.disarm();
        });
    }

    async fn reload(&self, previous: Option<Arc<CacheEntry>>) {
        let timeout = self.inner.reload_timeout;
        let fetched = match tokio::time::timeout(timeout, self.fetch(previous.as_deref())).await
        {
            Ok(result) => result,
            Err(_) => Err(QueryError::unavailable(format!(
                "reload timed out after {}s",
                timeout.as_secs_f64()
            ))),
        };
        let now = self.inner.clock.now();

        let (result, waiters) = {
            let mut state = self.inner.state.lock();
            state.reloads += 1;
            let result = match fetched {
                Ok(snapshot) => {
                    let entry = Arc::new(CacheEntry {
                        version: snapshot.version(),
                        snapshot,
                        loaded_at: now,
                    });
                    state.entry = Some(entry.clone());
                    state.last_error = None;
                    state.last_error_at = None;
                    Ok(entry)
                }
                Err(e) => {
                    state.last_error = Some(e.to_string());
                    state.last_error_at = Some(now);
                    Err(e)
                }
            };
            let reload = state.reloading.take().unwrap_or_default();
            if !reload.follow_up.is_empty() {
                debug!(
                    waiters = reload.follow_up.len(),
                    "forced refresh joined a running reload, reloading again"
                );
                self.start_reload(&mut state, reload.follow_up);
            }
            (result, reload.waiters)
        };

        match &result {
            Ok(entry) if previous.as_ref().map(|p| p.version) != Some(entry.version) => {
                info!(
                    version = %entry.version,
                    items = entry.snapshot.item_count(),
                    "index snapshot loaded"
                );
            }
            Ok(entry) => debug!(version = %entry.version, "index snapshot still current"),
            Err(e) => warn!(
                error = %e,
                kept = ?previous.as_ref().map(|p| p.version),
                "index reload failed"
            ),
        }

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    /// Follow the pointer; reuse the current snapshot when it names the same
    /// version.
    async fn fetch(&self, previous: Option<&CacheEntry>) -> Result<Arc<IndexSnapshot>> {
        let pointer = self
            .inner
            .store
            .read_current()
            .await?
            .ok_or_else(|| QueryError::unavailable("no index version has been published"))?;

        if let Some(previous) = previous {
            if previous.version == pointer.version {
                return Ok(previous.snapshot.clone());
            }
        }

        let stored = self.inner.store.load(pointer.version).await?;
        Ok(Arc::new(IndexSnapshot::from_stored(stored)))
    }
}

/// Fails the waiters of a reload task that ends without answering them
/// (panic or runtime shutdown), so the next caller can start a fresh reload.
struct ReloadGuard {
    cache: IndexCache,
    finished: bool,
}

impl ReloadGuard {
    fn disarm(mut self) {
        self.finished = true;
    }
}

impl Drop for ReloadGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let reload = self.cache.inner.state.lock().reloading.take();
        let Some(reload) = reload else {
            return;
        };
        warn!("index reload task ended without a result");
        for waiter in reload.waiters.into_iter().chain(reload.follow_up) {
            let _ = waiter.send(Err(QueryError::unavailable("reload abandoned")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geocat_core::{CollectionRow, IndexTables, ManualClock, TemporalExtent};
    use geocat_store::{MemoryIndexStore, PublishStats};

    fn tables(collection: &str) -> IndexTables {
        IndexTables {
            catalog: None,
            collections: vec![CollectionRow {
                id: collection.into(),
                title: None,
                description: None,
                license: None,
                spatial: None,
                temporal: TemporalExtent::default(),
                extra: Default::default(),
            }],
            items: vec![],
        }
    }

    async fn publish(store: &MemoryIndexStore, collection: &str) -> VersionId {
        let version = VersionId::generate();
        store
            .publish(version, &tables(collection), PublishStats::default())
            .await
            .unwrap();
        version
    }

    fn cache(store: &MemoryIndexStore, clock: &Arc<ManualClock>) -> IndexCache {
        IndexCache::with_options(
            Arc::new(store.clone()),
            clock.clone(),
            Duration::from_secs(60),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_ttl_and_force_refresh_scenario() {
        let store = MemoryIndexStore::new();
        let clock = Arc::new(ManualClock::default());
        let cache = cache(&store, &clock);

        let v1 = publish(&store, "v1").await;
        assert_eq!(cache.get().await.unwrap().version, v1);

        // Rebuild publishes V2 at t=0.
        let v2 = publish(&store, "v2").await;

        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.get().await.unwrap().version, v1);

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.force_refresh().await.unwrap().version, v2);
        assert_eq!(cache.get().await.unwrap().version, v2);

        let v3 = publish(&store, "v3").await;
        clock.advance(Duration::from_secs(26));
        assert_eq!(cache.get().await.unwrap().version, v2);
        clock.advance(Duration::from_secs(35));
        assert_eq!(cache.get().await.unwrap().version, v3);
    }

    #[tokio::test]
    async fn test_expiry_without_new_version_renews_timestamp_only() {
        let store = MemoryIndexStore::new();
        let clock = Arc::new(ManualClock::default());
        let cache = cache(&store, &clock);
        publish(&store, "only").await;

        let first = cache.get().await.unwrap();
        clock.advance(Duration::from_secs(61));
        let second = cache.get().await.unwrap();

        assert_eq!(store.load_count(), 1);
        assert!(Arc::ptr_eq(&first.snapshot, &second.snapshot));
        assert!(second.loaded_at > first.loaded_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reloads_coalesce() {
        let store = MemoryIndexStore::new();
        store.set_load_delay(Some(Duration::from_millis(200)));
        let clock = Arc::new(ManualClock::default());
        let cache = cache(&store, &clock);
        let version = publish(&store, "c").await;

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        cache.get().await
                    } else {
                        cache.force_refresh().await
                    }
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().version, version);
        }
        // Forced callers that joined share one follow-up run, which finds the
        // pointer unchanged and reuses the snapshot.
        assert_eq!(store.load_count(), 1);
        assert!(cache.status().reloads <= 2);
        assert!(!cache.status().reloading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_sees_version_published_during_reload() {
        let store = MemoryIndexStore::new();
        store.set_load_delay(Some(Duration::from_millis(300)));
        let clock = Arc::new(ManualClock::default());
        let cache = cache(&store, &clock);
        let v1 = publish(&store, "v1").await;

        let reader = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get().await }
        });
        // Wait until that reload has read the pointer and is inside load.
        while store.load_count() == 0 {
            tokio::task::yield_now().await;
        }

        let v2 = publish(&store, "v2").await;
        assert_eq!(cache.force_refresh().await.unwrap().version, v2);
        assert_eq!(reader.await.unwrap().unwrap().version, v1);
        assert_eq!(cache.current().unwrap().version, v2);
        assert_eq!(store.load_count(), 2);
        assert_eq!(cache.status().reloads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_during_follow_up_reload_joins_it() {
        let store = MemoryIndexStore::new();
        store.set_load_delay(Some(Duration::from_millis(300)));
        let clock = Arc::new(ManualClock::default());
        let cache = cache(&store, &clock);
        publish(&store, "v1").await;

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get().await }
        });
        while store.load_count() == 0 {
            tokio::task::yield_now().await;
        }
        let v2 = publish(&store, "v2").await;
        let forced = tokio::spawn({
            let cache = cache.clone();
            async move { cache.force_refresh().await }
        });
        first.await.unwrap().unwrap();

        // The follow-up run is in flight now; a stale read waits for it.
        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get().await.unwrap().version, v2);
        assert_eq!(forced.await.unwrap().unwrap().version, v2);
        assert_eq!(store.load_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_entry() {
        let store = MemoryIndexStore::new();
        let clock = Arc::new(ManualClock::default());
        let cache = cache(&store, &clock);
        let v1 = publish(&store, "v1").await;
        cache.get().await.unwrap();

        store.set_unavailable(true);
        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get().await.unwrap().version, v1);
        assert!(cache.force_refresh().await.is_err());

        let status = cache.status();
        assert_eq!(status.version, Some(v1));
        assert!(status.last_error.is_some());

        store.set_unavailable(false);
        cache.force_refresh().await.unwrap();
        assert!(cache.status().last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_timeout_keeps_previous_entry() {
        let store = MemoryIndexStore::new();
        let clock = Arc::new(ManualClock::default());
        let cache = cache(&store, &clock);
        let v1 = publish(&store, "v1").await;
        cache.get().await.unwrap();

        publish(&store, "v2").await;
        store.set_load_delay(Some(Duration::from_secs(30)));
        clock.advance(Duration::from_secs(61));

        assert_eq!(cache.get().await.unwrap().version, v1);
        assert!(cache
            .status()
            .last_error
            .unwrap()
            .contains("timed out"));
    }

    /// Store whose next pointer read panics
    #[derive(Debug)]
    struct PanicOnce {
        inner: MemoryIndexStore,
        armed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl IndexStore for PanicOnce {
        async fn publish(
            &self,
            version: VersionId,
            tables: &IndexTables,
            stats: PublishStats,
        ) -> geocat_store::Result<geocat_store::CurrentPointer> {
            self.inner.publish(version, tables, stats).await
        }

        async fn read_current(&self) -> geocat_store::Result<Option<geocat_store::CurrentPointer>> {
            if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                panic!("pointer read blew up");
            }
            self.inner.read_current().await
        }

        async fn load(&self, version: VersionId) -> geocat_store::Result<geocat_store::StoredVersion> {
            self.inner.load(version).await
        }

        async fn list_versions(&self) -> geocat_store::Result<Vec<VersionId>> {
            self.inner.list_versions().await
        }

        async fn delete_version(&self, version: VersionId) -> geocat_store::Result<()> {
            self.inner.delete_version(version).await
        }

        fn in_flight(&self) -> Vec<VersionId> {
            self.inner.in_flight()
        }

        fn location(&self) -> String {
            self.inner.location()
        }
    }

    #[tokio::test]
    async fn test_panicked_reload_does_not_block_later_reloads() {
        let store = Arc::new(PanicOnce {
            inner: MemoryIndexStore::new(),
            armed: std::sync::atomic::AtomicBool::new(true),
        });
        let v1 = publish(&store.inner, "v1").await;
        let cache = IndexCache::with_options(
            store.clone(),
            Arc::new(ManualClock::default()),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );

        assert!(matches!(cache.get().await, Err(QueryError::Unavailable(_))));
        assert!(!cache.status().reloading);

        assert_eq!(cache.get().await.unwrap().version, v1);
        assert_eq!(cache.force_refresh().await.unwrap().version, v1);
    }

    #[tokio::test]
    async fn test_nothing_loaded_is_unavailable() {
        let store = MemoryIndexStore::new();
        let clock = Arc::new(ManualClock::default());
        let cache = cache(&store, &clock);

        assert!(matches!(cache.get().await, Err(QueryError::Unavailable(_))));

        store.set_unavailable(true);
        assert!(matches!(cache.get().await, Err(QueryError::Unavailable(_))));
        assert!(cache.current().is_none());
    }
}
