//! Logging setup and request correlation.

use crate::config::ServerConfig;
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Primary log filter (RUST_LOG env var)
    pub log_filter: String,
    /// Fallback log level if RUST_LOG not set
    pub default_level: String,
    /// Request ID header name (default: "x-request-id")
    pub request_id_header: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Human,
    Json,
}

impl TelemetryConfig {
    /// Create telemetry config with server config for CLI log level support
    pub fn with_server_config(server_config: &ServerConfig) -> Self {
        let rust_log = env::var("RUST_LOG").unwrap_or_default();
        let default_level = if rust_log.is_empty() {
            env::var("LOG_LEVEL").unwrap_or_else(|_| server_config.log_level.clone())
        } else {
            server_config.log_level.clone()
        };

        Self::from_env_with_defaults(default_level)
    }

    fn from_env_with_defaults(default_level: String) -> Self {
        Self {
            log_filter: env::var("RUST_LOG").unwrap_or_default(),
            default_level,
            request_id_header: env::var("LOG_REQUEST_ID_HEADER")
                .unwrap_or_else(|_| "x-request-id".to_string()),
            log_format: parse_log_format(&env::var("LOG_FORMAT").unwrap_or_default()),
        }
    }

    /// The filter directive actually installed
    pub fn filter_directive(&self) -> &str {
        if self.log_filter.is_empty() {
            &self.default_level
        } else {
            &self.log_filter
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::with_server_config(&ServerConfig::default())
    }
}

fn parse_log_format(value: &str) -> LogFormat {
    match value.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Human,
    }
}

/// Initialize logging.
///
/// Safe to call multiple times - will only initialize once.
pub fn init_logging(config: &TelemetryConfig) {
    // A global subscriber may already be set (e.g. from tests).
    if tracing::dispatcher::has_been_set() {
        tracing::debug!("tracing subscriber already initialized, skipping");
        return;
    }

    let filter = EnvFilter::try_new(config.filter_directive())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .boxed(),
        LogFormat::Human => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    // try_init: another thread may have won the race since has_been_set().
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn header_str<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Extract request ID from headers
///
/// Checks, in order: the configured header, `x-amzn-trace-id`, `x-trace-id`.
pub fn extract_request_id(
    headers: &axum::http::HeaderMap,
    config: &TelemetryConfig,
) -> Option<String> {
    [
        config.request_id_header.as_str(),
        "x-amzn-trace-id",
        "x-trace-id",
    ]
    .into_iter()
    .find_map(|name| header_str(headers, name))
    .map(str::to_string)
}

/// Trace ID from a W3C `traceparent` header, else `x-trace-id`
pub fn extract_trace_id(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(tp) = header_str(headers, "traceparent") {
        // version-trace_id-span_id-flags
        if let Some(trace_id) = tp.split('-').nth(1) {
            return Some(trace_id.to_string());
        }
    }
    header_str(headers, "x-trace-id").map(str::to_string)
}

/// Span for one HTTP request
pub fn create_request_span(
    method: &str,
    path: &str,
    request_id: Option<&str>,
    trace_id: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "request",
        method = method,
        path = path,
        request_id = request_id,
        trace_id = trace_id,
        status = tracing::field::Empty,
        error_code = tracing::field::Empty,
    )
}

/// Record an error type on a request span
pub fn set_span_error_code(span: &tracing::Span, error_code: &str) {
    span.record("error_code", error_code);
}
