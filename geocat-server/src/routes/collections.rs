//! Collection and item endpoints

use super::{base_url, encode_query, query_with_cursor};
use crate::error::Result;
use crate::stac;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use geocat_query::SearchRequest;
use serde_json::Value;
use std::sync::Arc;

/// GET /collections
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let base = base_url(&state, &headers);
    let collections = state.engine.list_collections().await?;
    tracing::debug!(
        version = %collections.version,
        count = collections.value.len(),
        "collections listed"
    );
    Ok(Json(stac::collections(&base, &collections.value)))
}

/// GET /collections/:collection_id
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let base = base_url(&state, &headers);
    let collection = state.engine.get_collection(&collection_id).await?;
    Ok(Json(stac::collection(&base, &collection.value)))
}

/// GET /collections/:collection_id/items
///
/// Accepts `limit`, `cursor`, `bbox`, `bbox_crs` and `datetime`.
pub async fn items(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let base = base_url(&state, &headers);
    let request = SearchRequest::from_query_pairs(params.iter().cloned());
    let page = state.engine.list_items(&collection_id, &request).await?;

    let path = format!("{base}/collections/{collection_id}/items");
    let self_href = if params.is_empty() {
        path.clone()
    } else {
        format!(
            "{path}?{}",
            encode_query(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        )
    };
    let next = page.value.next_cursor.as_ref().map(|cursor| {
        stac::link(
            "next",
            format!("{path}?{}", query_with_cursor(&params, &cursor.encode())),
            "application/geo+json",
        )
    });

    tracing::debug!(
        version = %page.version,
        collection = %collection_id,
        matched = page.value.matched,
        returned = page.value.items.len(),
        "items listed"
    );
    Ok(Json(stac::item_collection(
        &base,
        self_href,
        &page.value.items,
        page.value.matched,
        next,
    )))
}

/// GET /collections/:collection_id/items/:item_id
pub async fn item(
    State(state): State<Arc<AppState>>,
    Path((collection_id, item_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let base = base_url(&state, &headers);
    let item = state.engine.get_item(&collection_id, &item_id).await?;
    Ok(Json(stac::item(&base, &item.value)))
}
