//! Admin endpoints: /health, /admin/refresh-index, /admin/rebuild-index

use crate::error::{Result, ServerError};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use geocat_indexer::{DocumentError, IndexerError, RebuildOutcome, RebuildPhase, RebuildReport};
use geocat_query::CacheStatus;
use serde::Serialize;
use std::sync::Arc;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, `degraded` or `unavailable`
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub cache: CacheHealth,
    /// Absent when no catalog root is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexer: Option<IndexerHealth>,
}

#[derive(Serialize)]
pub struct CacheHealth {
    pub index_version: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub ttl_secs: u64,
    pub items: usize,
    pub collections: usize,
    /// Documents skipped when the loaded version was built
    pub document_errors: usize,
    pub reloads: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct IndexerHealth {
    pub phase: RebuildPhase,
    pub runs: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_version: Option<String>,
    pub last_document_errors: Option<usize>,
}

fn cache_health(status: CacheStatus, ttl_secs: u64) -> CacheHealth {
    CacheHealth {
        index_version: status.version.map(|v| v.to_string()),
        loaded_at: status.loaded_at,
        ttl_secs,
        items: status.items,
        collections: status.collections,
        document_errors: status.document_errors,
        reloads: status.reloads,
        last_error: status.last_error,
        last_error_at: status.last_error_at,
    }
}

/// Health check endpoint
///
/// GET /health
///
/// Always 200 so probes can read the body; `status` is `unavailable` until
/// an index version has been loaded and `degraded` while the most recent
/// reload or rebuild has failed.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    // Load on first probe so a fresh server reports the published index.
    if state.engine.cache().current().is_none() {
        let _ = state.engine.snapshot().await;
    }

    let cache = cache_health(
        state.engine.cache().status(),
        state.engine.cache().ttl().as_secs(),
    );
    let indexer = state.rebuild.as_ref().map(|handle| {
        let status = handle.status();
        IndexerHealth {
            phase: status.phase,
            runs: status.runs,
            failures: status.failures,
            last_error: status.last_error,
            last_finished_at: status.last_finished_at,
            last_version: status.last_report.as_ref().map(|r| r.version.to_string()),
            last_document_errors: status.last_report.as_ref().map(|r| r.document_errors.len()),
        }
    });

    let status = if cache.index_version.is_none() {
        "unavailable"
    } else if cache.last_error.is_some()
        || indexer.as_ref().is_some_and(|i| i.last_error.is_some())
    {
        "degraded"
    } else {
        "ok"
    };
    tracing::debug!(status, "health check requested");

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        cache,
        indexer,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub version: String,
    pub loaded_at: DateTime<Utc>,
    pub items: usize,
    pub collections: usize,
}

/// Reload the cache now
///
/// POST /admin/refresh-index
pub async fn refresh_index(State(state): State<Arc<AppState>>) -> Result<Json<RefreshResponse>> {
    let entry = state.engine.cache().force_refresh().await?;
    tracing::info!(version = %entry.version, "index refreshed on request");
    Ok(Json(RefreshResponse {
        version: entry.version.to_string(),
        loaded_at: entry.loaded_at,
        items: entry.snapshot.item_count(),
        collections: entry.snapshot.collections().len(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildResponse {
    pub version: String,
    pub items: usize,
    pub collections: usize,
    pub document_errors: Vec<DocumentError>,
    pub versions_deleted: usize,
    pub duration_ms: u64,
    /// Version now served, after the post-rebuild refresh
    pub serving: Option<String>,
}

impl RebuildResponse {
    fn new(report: &RebuildReport, serving: Option<String>) -> Self {
        Self {
            version: report.version.to_string(),
            items: report.items,
            collections: report.collections,
            document_errors: report.document_errors.clone(),
            versions_deleted: report.versions_deleted,
            duration_ms: report.duration.as_millis() as u64,
            serving,
        }
    }
}

/// Rebuild the index from the catalog root, wait for it, then refresh the
/// cache so the new version is served immediately.
///
/// POST /admin/rebuild-index
pub async fn rebuild_index(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RebuildResponse>> {
    let handle = state
        .rebuild
        .as_ref()
        .ok_or_else(|| ServerError::conflict("no catalog root configured; rebuilds are disabled"))?;

    tracing::info!("rebuild requested");
    match handle.trigger().wait().await {
        RebuildOutcome::Completed(report) => {
            let serving = match state.engine.cache().force_refresh().await {
                Ok(entry) => Some(entry.version.to_string()),
                Err(e) => {
                    tracing::warn!(error = %e, "refresh after rebuild failed");
                    None
                }
            };
            Ok(Json(RebuildResponse::new(&report, serving)))
        }
        RebuildOutcome::Failed(message) => Err(ServerError::Rebuild(message)),
        RebuildOutcome::Cancelled => Err(IndexerError::Cancelled.into()),
    }
}
