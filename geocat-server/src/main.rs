//! geocat server CLI
//!
//! Run with: `cargo run -p geocat-server -- --help`

use clap::{CommandFactory, FromArgMatches};
use geocat_server::{
    config_file::load_and_merge_config,
    telemetry::{init_logging, TelemetryConfig},
    GeocatServer, ServerConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. CLI + env via clap (typed config and raw matches)
    let matches = ServerConfig::command().get_matches();
    let mut config = ServerConfig::from_arg_matches(&matches)?;

    // 2. Config file values apply only where CLI/env didn't set a value
    if let Err(e) = load_and_merge_config(&mut config, &matches) {
        eprintln!("Warning: {e}");
    }

    let telemetry_config = TelemetryConfig::with_server_config(&config);
    init_logging(&telemetry_config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr,
        index_path = %config.index_path.display(),
        catalog_path = ?config.catalog_path,
        cache_ttl_secs = config.cache_ttl_secs,
        max_limit = config.max_limit,
        poll_interval_secs = ?config.poll_interval_secs,
        rebuild_on_start = config.rebuild_on_start,
        cors = config.cors_enabled,
        log_format = ?telemetry_config.log_format,
        "Starting geocat server"
    );

    let server = GeocatServer::new(config)?;
    server.run().await.map_err(Into::into)
}
