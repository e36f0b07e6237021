//! Background rebuild orchestration
//!
//! - `RebuildHandle`: a cloneable, coalescing request handle
//! - `RebuildWorker`: the loop that runs rebuilds one at a time
//!
//! Requests that arrive while a rebuild is running set a single pending flag,
//! so any number of them produce exactly one follow-up run. A completion
//! handle resolves with the outcome of the first run that *starts* after its
//! request was made, so a caller never observes a run that may have missed
//! its change.
//!
//! # Example
//!
//! ```ignore
//! let (worker, handle) = RebuildWorker::new(indexer, cancel.clone());
//! tokio::spawn(worker.run());
//!
//! // Fire and forget
//! handle.notify(RebuildRequest::root_changed());
//!
//! // Or wait for the outcome
//! let outcome = handle.trigger().wait().await;
//! ```

use crate::error::IndexerError;
use crate::indexer::{Indexer, RebuildReport};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Transport-neutral "documents may have changed" message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildRequest {
    pub root_changed: bool,
}

impl RebuildRequest {
    pub fn root_changed() -> Self {
        Self { root_changed: true }
    }
}

/// Terminal result of a requested rebuild
#[derive(Debug, Clone)]
pub enum RebuildOutcome {
    Completed(Arc<RebuildReport>),
    Failed(String),
    Cancelled,
}

/// Handle to wait for a requested rebuild
pub struct RebuildCompletion {
    receiver: oneshot::Receiver<RebuildOutcome>,
}

impl RebuildCompletion {
    pub async fn wait(self) -> RebuildOutcome {
        self.receiver.await.unwrap_or(RebuildOutcome::Cancelled)
    }

    /// Non-blocking check; `None` while the rebuild is outstanding
    pub fn try_get(&mut self) -> Option<RebuildOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(RebuildOutcome::Cancelled),
        }
    }
}

impl std::fmt::Debug for RebuildCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildCompletion").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildPhase {
    Idle,
    /// A run is queued but not started
    Pending,
    Running,
}

/// Point-in-time view of the worker, for health reporting
#[derive(Debug, Clone)]
pub struct RebuildStatus {
    pub phase: RebuildPhase,
    pub last_report: Option<Arc<RebuildReport>>,
    /// Error of the most recent run, cleared by the next success
    pub last_error: Option<String>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub runs: u64,
    pub failures: u64,
}

#[derive(Debug)]
struct WorkerState {
    phase: RebuildPhase,
    pending: bool,
    /// Waiters for the next run to start
    waiters: Vec<oneshot::Sender<RebuildOutcome>>,
    last_report: Option<Arc<RebuildReport>>,
    last_error: Option<String>,
    last_finished_at: Option<DateTime<Utc>>,
    runs: u64,
    failures: u64,
    stopped: bool,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            phase: RebuildPhase::Idle,
            pending: false,
            waiters: Vec::new(),
            last_report: None,
            last_error: None,
            last_finished_at: None,
            runs: 0,
            failures: 0,
            stopped: false,
        }
    }
}

impl WorkerState {
    fn status(&self) -> RebuildStatus {
        RebuildStatus {
            phase: self.phase,
            last_report: self.last_report.clone(),
            last_error: self.last_error.clone(),
            last_finished_at: self.last_finished_at,
            runs: self.runs,
            failures: self.failures,
        }
    }

    fn schedule(&mut self) {
        self.pending = true;
        if self.phase == RebuildPhase::Idle {
            self.phase = RebuildPhase::Pending;
        }
    }
}

/// Handle for requesting rebuilds of one document root
#[derive(Clone)]
pub struct RebuildHandle {
    state: Arc<Mutex<WorkerState>>,
    tick: watch::Sender<u64>,
    idle_notify: Arc<Notify>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RebuildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildHandle")
            .field("state", &"<Mutex<WorkerState>>")
            .field("tick", &"<watch::Sender>")
            .finish()
    }
}

impl RebuildHandle {
    /// Consume a rebuild request. Returns whether a run was scheduled;
    /// requests with `root_changed == false` are ignored.
    pub fn notify(&self, request: RebuildRequest) -> bool {
        if !request.root_changed {
            debug!("rebuild request without change ignored");
            return false;
        }
        {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            state.schedule();
        }
        self.tick.send_modify(|t| *t = t.wrapping_add(1));
        true
    }

    /// Request a rebuild and get a handle on its outcome.
    pub fn trigger(&self) -> RebuildCompletion {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.stopped {
                let _ = tx.send(RebuildOutcome::Cancelled);
                return RebuildCompletion { receiver: rx };
            }
            state.waiters.push(tx);
            state.schedule();
        }
        self.tick.send_modify(|t| *t = t.wrapping_add(1));
        RebuildCompletion { receiver: rx }
    }

    pub fn status(&self) -> RebuildStatus {
        self.state.lock().status()
    }

    /// Stop the worker. A running scan aborts at the next document; queued
    /// waiters resolve as cancelled.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait until no run is pending or in progress.
    pub async fn wait_for_idle(&self) {
        loop {
            // Create the notification future before checking, to avoid a
            // missed wakeup.
            let notified = self.idle_notify.notified();
            if self.state.lock().phase == RebuildPhase::Idle {
                return;
            }
            notified.await;
        }
    }
}

/// Runs rebuilds requested through a [`RebuildHandle`]
pub struct RebuildWorker {
    indexer: Indexer,
    state: Arc<Mutex<WorkerState>>,
    tick_rx: watch::Receiver<u64>,
    idle_notify: Arc<Notify>,
    cancel: CancellationToken,
}

impl RebuildWorker {
    /// Create a worker and its handle. Cancelling `cancel` stops the worker.
    pub fn new(indexer: Indexer, cancel: CancellationToken) -> (Self, RebuildHandle) {
        let state = Arc::new(Mutex::new(WorkerState::default()));
        let (tick_tx, tick_rx) = watch::channel(0u64);
        let idle_notify = Arc::new(Notify::new());

        let worker = Self {
            indexer,
            state: state.clone(),
            tick_rx,
            idle_notify: idle_notify.clone(),
            cancel: cancel.clone(),
        };
        let handle = RebuildHandle {
            state,
            tick: tick_tx,
            idle_notify,
            cancel,
        };
        (worker, handle)
    }

    /// Run until cancelled or until every handle is dropped.
    pub async fn run(mut self) {
        info!(root = %self.indexer.source().location(), "rebuild worker started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let pending = self.state.lock().pending;
            if pending {
                self.run_once().await;
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = self.tick_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let waiters = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.pending = false;
            state.phase = RebuildPhase::Idle;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(RebuildOutcome::Cancelled);
        }
        self.idle_notify.notify_waiters();
        info!("rebuild worker stopped");
    }

    async fn run_once(&self) {
        let waiters = {
            let mut state = self.state.lock();
            state.pending = false;
            state.phase = RebuildPhase::Running;
            std::mem::take(&mut state.waiters)
        };

        let result = self.indexer.rebuild_with_cancel(&self.cancel).await;
        let finished_at = self.indexer.clock().now();

        let outcome = {
            let mut state = self.state.lock();
            state.runs += 1;
            state.last_finished_at = Some(finished_at);
            let outcome = match result {
                Ok(report) => {
                    let report = Arc::new(report);
                    state.last_report = Some(report.clone());
                    state.last_error = None;
                    RebuildOutcome::Completed(report)
                }
                Err(IndexerError::Cancelled) => RebuildOutcome::Cancelled,
                Err(e) => {
                    warn!(error = %e, "rebuild failed; previous version stays current");
                    state.failures += 1;
                    state.last_error = Some(e.to_string());
                    RebuildOutcome::Failed(e.to_string())
                }
            };
            state.phase = if state.pending {
                RebuildPhase::Pending
            } else {
                RebuildPhase::Idle
            };
            outcome
        };

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        self.idle_notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DocumentSource, MemoryDocumentSource, SourceEntry};
    use crate::test_docs::sample_source;
    use async_trait::async_trait;
    use geocat_store::{IndexStore, MemoryIndexStore};
    use std::time::Duration;

    /// Source whose listing takes a while, so requests can land mid-run
    #[derive(Debug)]
    struct SlowSource(MemoryDocumentSource);

    #[async_trait]
    impl DocumentSource for SlowSource {
        async fn list(&self) -> crate::Result<Vec<SourceEntry>> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.0.list().await
        }

        async fn read(&self, key: &str) -> crate::Result<Vec<u8>> {
            self.0.read(key).await
        }

        fn location(&self) -> String {
            self.0.location()
        }
    }

    fn spawn_worker(
        source: Arc<dyn DocumentSource>,
        store: MemoryIndexStore,
    ) -> (RebuildHandle, CancellationToken) {
        let cancel = CancellationToken::new();
        let indexer = Indexer::new(source, Arc::new(store));
        let (worker, handle) = RebuildWorker::new(indexer, cancel.clone());
        tokio::spawn(worker.run());
        (handle, cancel)
    }

    async fn wait_for_phase(handle: &RebuildHandle, phase: RebuildPhase) {
        while handle.status().phase != phase {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_trigger_completes() {
        let store = MemoryIndexStore::new();
        let (handle, _cancel) =
            spawn_worker(Arc::new(sample_source("orch-trigger")), store.clone());

        let outcome = handle.trigger().wait().await;
        let RebuildOutcome::Completed(report) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(report.items, 4);
        assert_eq!(
            store.read_current().await.unwrap().unwrap().version,
            report.version
        );

        handle.wait_for_idle().await;
        let status = handle.status();
        assert_eq!(status.phase, RebuildPhase::Idle);
        assert_eq!(status.runs, 1);
        assert!(status.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_during_run_coalesce_into_one_follow_up() {
        let store = MemoryIndexStore::new();
        let source = Arc::new(SlowSource(sample_source("orch-coalesce")));
        let (handle, _cancel) = spawn_worker(source, store);

        let first = handle.trigger();
        wait_for_phase(&handle, RebuildPhase::Running).await;

        for _ in 0..5 {
            assert!(handle.notify(RebuildRequest::root_changed()));
        }
        let follow_up = handle.trigger();

        let RebuildOutcome::Completed(a) = first.wait().await else {
            panic!("first run failed");
        };
        let RebuildOutcome::Completed(b) = follow_up.wait().await else {
            panic!("follow-up run failed");
        };
        assert!(b.version > a.version);

        handle.wait_for_idle().await;
        assert_eq!(handle.status().runs, 2);
    }

    #[tokio::test]
    async fn test_unchanged_request_is_ignored() {
        let store = MemoryIndexStore::new();
        let (handle, _cancel) = spawn_worker(Arc::new(sample_source("orch-noop")), store);
        assert!(!handle.notify(RebuildRequest { root_changed: false }));
        assert_eq!(handle.status().phase, RebuildPhase::Idle);
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let store = MemoryIndexStore::new();
        let (handle, _cancel) =
            spawn_worker(Arc::new(MemoryDocumentSource::new("orch-empty")), store);

        let outcome = handle.trigger().wait().await;
        assert!(matches!(outcome, RebuildOutcome::Failed(_)));
        handle.wait_for_idle().await;
        let status = handle.status();
        assert_eq!(status.failures, 1);
        assert!(status.last_error.unwrap().contains("No valid documents"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_outstanding_requests() {
        let store = MemoryIndexStore::new();
        let source = Arc::new(SlowSource(sample_source("orch-shutdown")));
        let (handle, cancel) = spawn_worker(source, store.clone());

        let first = handle.trigger();
        wait_for_phase(&handle, RebuildPhase::Running).await;
        let queued = handle.trigger();
        cancel.cancel();

        assert!(matches!(first.wait().await, RebuildOutcome::Cancelled));
        assert!(matches!(queued.wait().await, RebuildOutcome::Cancelled));
        assert!(store.read_current().await.unwrap().is_none());
        assert!(matches!(
            handle.trigger().wait().await,
            RebuildOutcome::Cancelled
        ));
    }
}
