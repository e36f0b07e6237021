//! Landing page, conformance and queryables

use super::base_url;
use crate::stac;
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::Value;
use std::sync::Arc;

/// GET /
///
/// Falls back to the configured title and description until an index has
/// been loaded.
pub async fn landing(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<Value> {
    let base = base_url(&state, &headers);
    let entry = state.engine.snapshot().await.ok();
    let snapshot = entry.as_ref().map(|e| &e.snapshot);
    Json(stac::landing(
        &base,
        snapshot.and_then(|s| s.catalog()),
        &state.config.catalog_title,
        &state.config.catalog_description,
        snapshot.map_or(&[][..], |s| s.collections()),
    ))
}

/// GET /conformance
pub async fn conformance() -> Json<Value> {
    Json(stac::conformance())
}

/// GET /queryables
pub async fn queryables(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<Value> {
    let base = base_url(&state, &headers);
    Json(stac::queryables(&base, state.registry()))
}
