//! HTTP route handlers and router configuration

mod admin;
mod catalog;
mod collections;
mod search;

use crate::error::ErrorCode;
use crate::state::AppState;
use crate::telemetry::{
    create_request_span, extract_request_id, extract_trace_id, set_span_error_code,
};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Build the main application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let read_routes = Router::new()
        .route("/", get(catalog::landing))
        .route("/conformance", get(catalog::conformance))
        .route("/queryables", get(catalog::queryables))
        .route("/collections", get(collections::list))
        .route("/collections/:collection_id", get(collections::get))
        .route("/collections/:collection_id/items", get(collections::items))
        .route(
            "/collections/:collection_id/items/:item_id",
            get(collections::item),
        )
        .route("/search", get(search::search_get).post(search::search_post))
        .layer(middleware::from_fn_with_state(state.clone(), cache_control));

    let mut router = Router::new()
        .merge(read_routes)
        .route("/health", get(admin::health))
        .route("/admin/refresh-index", post(admin::refresh_index))
        .route("/admin/rebuild-index", post(admin::rebuild_index))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), request_span))
        .layer(TraceLayer::new_for_http());

    if state.config.cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Wrap each request in a correlation span and record its outcome.
async fn request_span(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let request_id = extract_request_id(request.headers(), &state.telemetry_config);
    let trace_id = extract_trace_id(request.headers());
    let span = create_request_span(
        request.method().as_str(),
        request.uri().path(),
        request_id.as_deref(),
        trace_id.as_deref(),
    );

    let response = next.run(request).instrument(span.clone()).await;
    span.record("status", response.status().as_u16());
    if let Some(ErrorCode(code)) = response.extensions().get::<ErrorCode>() {
        set_span_error_code(&span, code);
    }
    response
}

/// `Cache-Control` on successful read responses
async fn cache_control(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    if response.status().is_success() {
        let value = format!("public, max-age={}", state.config.cache_max_age);
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(header::CACHE_CONTROL, value);
        }
    }
    response
}

/// Base URL for response links: the configured public URL, otherwise the
/// scheme and host the request came in on.
pub(crate) fn base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(url) = &state.config.public_url {
        return url.trim_end_matches('/').to_string();
    }
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let scheme = header_str("x-forwarded-proto").unwrap_or("http");
    match header_str("x-forwarded-host").or_else(|| header_str(header::HOST.as_str())) {
        Some(host) => format!("{scheme}://{host}"),
        None => format!("{scheme}://{}", state.config.listen_addr),
    }
}

/// Percent-encoded `k=v&...` query string
pub(crate) fn encode_query<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

    pairs
        .into_iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, NON_ALPHANUMERIC),
                utf8_percent_encode(v, NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Query string with `cursor` replaced, for `next` links
pub(crate) fn query_with_cursor(pairs: &[(String, String)], cursor: &str) -> String {
    encode_query(
        pairs
            .iter()
            .filter(|(k, _)| k != "cursor" && k != "token")
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(std::iter::once(("cursor", cursor))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_with_cursor_replaces_previous() {
        let pairs = vec![
            ("limit".to_string(), "2".to_string()),
            ("cursor".to_string(), "old".to_string()),
            ("bbox".to_string(), "1,2,3,4".to_string()),
        ];
        assert_eq!(
            query_with_cursor(&pairs, "abc"),
            "limit=2&bbox=1%2C2%2C3%2C4&cursor=abc"
        );
    }
}
