//! Item search: GET /search (query string) and POST /search (JSON body)

use super::{base_url, encode_query, query_with_cursor};
use crate::error::{Result, ServerError};
use crate::stac;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use geocat_query::{Page, SearchRequest, Versioned};
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /search
pub async fn search_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let base = base_url(&state, &headers);
    let request = SearchRequest::from_query_pairs(params.iter().cloned());
    let page = run(&state, &request).await?;

    let path = format!("{base}/search");
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
    Ok(Json(stac::item_collection(
        &base,
        self_href,
        &page.value.items,
        page.value.matched,
        next,
    )))
}

/// POST /search
///
/// The `next` link repeats the request body with `cursor` set.
pub async fn search_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = body.map_err(|e| ServerError::Json(e.body_text()))?;
    if !body.is_object() {
        return Err(ServerError::bad_request("search body must be a JSON object"));
    }
    let request: SearchRequest = serde_json::from_value(body.clone())
        .map_err(|e| ServerError::bad_request(format!("invalid search body: {e}")))?;

    let base = base_url(&state, &headers);
    let page = run(&state, &request).await?;

    let href = format!("{base}/search");
    let next = page.value.next_cursor.as_ref().map(|cursor| {
        let mut next_body = body.clone();
        if let Some(obj) = next_body.as_object_mut() {
            obj.remove("token");
            obj.insert("cursor".into(), json!(cursor.encode()));
        }
        let mut link = stac::link("next", href.clone(), "application/geo+json");
        link["method"] = json!("POST");
        link["body"] = next_body;
        link
    });
    Ok(Json(stac::item_collection(
        &base,
        href,
        &page.value.items,
        page.value.matched,
        next,
    )))
}

async fn run(state: &AppState, request: &SearchRequest) -> Result<Versioned<Page>> {
    let page = state.engine.search(request).await?;
    tracing::debug!(
        version = %page.version,
        matched = page.value.matched,
        returned = page.value.items.len(),
        has_more = page.value.next_cursor.is_some(),
        "search answered"
    );
    Ok(page)
}
