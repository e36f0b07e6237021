//! geocat HTTP Server
//!
//! Serves a published geocat index as a STAC-style catalog API and
//! optionally keeps it current by rebuilding from a metadata document tree.
//!
//! # Features
//!
//! - Landing page, conformance, queryables
//! - Collection and item browsing with cursor pagination
//! - Item search (GET and POST) with bbox in any registered CRS
//! - Freshness-bounded index cache with forced refresh
//! - Rebuilds on request, on start or on detected changes
//! - CORS and `Cache-Control` support
//!
//! # Example
//!
//! ```ignore
//! use geocat_server::{GeocatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let server = GeocatServer::new(config).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod config;
pub mod config_file;
pub mod error;
pub mod routes;
pub mod stac;
pub mod state;
pub mod telemetry;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use state::AppState;
pub use telemetry::{init_logging, TelemetryConfig};

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// geocat HTTP Server
pub struct GeocatServer {
    state: Arc<AppState>,
    router: Router,
}

impl GeocatServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Result<Self> {
        let telemetry_config = TelemetryConfig::with_server_config(&config);
        let state = Arc::new(AppState::new(config, telemetry_config)?);
        Ok(Self::with_state(state))
    }

    /// Create a server over prepared state
    pub fn with_state(state: Arc<AppState>) -> Self {
        let router = routes::build_router(state.clone());
        Self { state, router }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Get the router (for testing)
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until ctrl-c, then stop background tasks.
    pub async fn run(self) -> std::result::Result<(), std::io::Error> {
        let addr = self.state.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;

        let tasks = self.state.start_background_tasks();

        info!(
            addr = %addr,
            index = %self.state.store.location(),
            rebuilds = self.state.rebuild.is_some(),
            background_tasks = tasks.len(),
            "geocat server listening"
        );

        let shutdown = self.state.shutdown.clone();
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutdown signal received");
                        shutdown.cancel();
                    }
                    _ = shutdown.cancelled() => {}
                }
            }
        });

        let result = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.state.shutdown();
        for task in tasks {
            task.abort();
        }
        info!("geocat server stopped");

        result
    }
}
