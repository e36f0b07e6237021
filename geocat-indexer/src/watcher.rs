//! Change polling.
//!
//! Turns "the document tree looks different" into a [`RebuildRequest`]. The
//! watcher only compares fingerprints; it knows nothing about what changed.

use crate::orchestrator::{RebuildHandle, RebuildRequest};
use crate::source::{fingerprint, DocumentSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Poll `source` every `interval` and notify `handle` whenever its
/// fingerprint changes. Stops when `cancel` fires.
pub fn spawn_poll_watcher(
    source: Arc<dyn DocumentSource>,
    handle: RebuildHandle,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = fingerprint(source.as_ref()).await.ok();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(
            root = %source.location(),
            interval_secs = interval.as_secs(),
            "change polling started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match fingerprint(source.as_ref()).await {
                Ok(current) if last.as_ref() != Some(&current) => {
                    debug!(fingerprint = %current, "document tree changed");
                    last = Some(current);
                    handle.notify(RebuildRequest::root_changed());
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "fingerprint failed"),
            }
        }
        debug!("change polling stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::Indexer;
    use crate::orchestrator::{RebuildPhase, RebuildWorker};
    use crate::test_docs::{item_doc, sample_source};
    use geocat_store::MemoryIndexStore;

    #[tokio::test(start_paused = true)]
    async fn test_change_triggers_rebuild() {
        let source = sample_source("watch-change");
        let cancel = CancellationToken::new();
        let indexer = Indexer::new(Arc::new(source.clone()), Arc::new(MemoryIndexStore::new()));
        let (worker, handle) = RebuildWorker::new(indexer, cancel.clone());
        tokio::spawn(worker.run());

        let watcher = spawn_poll_watcher(
            Arc::new(source.clone()),
            handle.clone(),
            Duration::from_secs(5),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(handle.status().runs, 0);

        source.insert_json("fuji/tiles/d.json", &item_doc("fuji", "d", None));
        tokio::time::sleep(Duration::from_secs(6)).await;
        handle.wait_for_idle().await;

        let status = handle.status();
        assert_eq!(status.runs, 1);
        assert_eq!(status.phase, RebuildPhase::Idle);
        assert_eq!(status.last_report.unwrap().items, 5);

        cancel.cancel();
        watcher.await.unwrap();
    }
}
