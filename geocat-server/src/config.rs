//! Server configuration

use clap::Parser;
use geocat_query::QueryLimits;
use geocat_store::RetentionPolicy;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// geocat catalog server configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "geocat-server")]
#[command(about = "STAC-style catalog and spatial search server")]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "GEOCAT_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// Directory holding published index versions
    #[arg(long, env = "GEOCAT_INDEX_PATH", default_value = "./index")]
    pub index_path: PathBuf,

    /// Root of the metadata document tree (enables rebuilds)
    #[arg(long, env = "GEOCAT_CATALOG_PATH")]
    pub catalog_path: Option<PathBuf>,

    /// Seconds a loaded index version is served before the pointer is re-checked
    #[arg(long, env = "GEOCAT_CACHE_TTL_SECS", default_value = "60")]
    pub cache_ttl_secs: u64,

    /// Upper bound on one cache reload, in seconds
    #[arg(long, env = "GEOCAT_RELOAD_TIMEOUT_SECS", default_value = "10")]
    pub reload_timeout_secs: u64,

    /// Page size when a request gives no limit
    #[arg(long, env = "GEOCAT_DEFAULT_LIMIT", default_value = "10")]
    pub default_limit: usize,

    /// Largest page size a request may ask for
    #[arg(long, env = "GEOCAT_MAX_LIMIT", default_value = "100")]
    pub max_limit: usize,

    /// Superseded index versions always kept
    #[arg(long, env = "GEOCAT_KEEP_LAST", default_value = "5")]
    pub keep_last: usize,

    /// Minutes a superseded index version is kept regardless of count
    #[arg(long, env = "GEOCAT_KEEP_FOR_MINS", default_value = "30")]
    pub keep_for_mins: u64,

    /// Poll the document tree for changes every N seconds (disabled when unset)
    #[arg(long, env = "GEOCAT_POLL_INTERVAL_SECS")]
    pub poll_interval_secs: Option<u64>,

    /// Rebuild the index once at startup
    #[arg(long, env = "GEOCAT_REBUILD_ON_START", default_value = "false")]
    pub rebuild_on_start: bool,

    /// Enable CORS (Cross-Origin Resource Sharing)
    #[arg(long, env = "GEOCAT_CORS_ENABLED", default_value = "true")]
    pub cors_enabled: bool,

    /// `Cache-Control: max-age` for read responses, in seconds
    #[arg(long, env = "GEOCAT_CACHE_MAX_AGE", default_value = "300")]
    pub cache_max_age: u64,

    /// Base URL used in response links (defaults to the request host)
    #[arg(long, env = "GEOCAT_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// CRS registry file replacing the built-in table
    #[arg(long, env = "GEOCAT_CRS_REGISTRY")]
    pub crs_registry: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GEOCAT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Landing page title when the catalog document has none
    #[arg(long, env = "GEOCAT_CATALOG_TITLE", default_value = "geocat")]
    pub catalog_title: String,

    /// Landing page description when the catalog document has none
    #[arg(
        long,
        env = "GEOCAT_CATALOG_DESCRIPTION",
        default_value = "Point cloud and raster catalog"
    )]
    pub catalog_description: String,

    /// Config file (or directory containing `.geocat/`)
    #[arg(long = "config", env = "GEOCAT_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Profile overlay from the config file
    #[arg(long, env = "GEOCAT_PROFILE")]
    pub profile: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            index_path: PathBuf::from("./index"),
            catalog_path: None,
            cache_ttl_secs: 60,
            reload_timeout_secs: 10,
            default_limit: geocat_query::DEFAULT_LIMIT,
            max_limit: geocat_query::MAX_LIMIT,
            keep_last: 5,
            keep_for_mins: 30,
            poll_interval_secs: None,
            rebuild_on_start: false,
            cors_enabled: true,
            cache_max_age: 300,
            public_url: None,
            crs_registry: None,
            log_level: "info".to_string(),
            catalog_title: "geocat".to_string(),
            catalog_description: "Point cloud and raster catalog".to_string(),
            config_file: None,
            profile: None,
        }
    }
}

impl ServerConfig {
    /// Create config from CLI args
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    pub fn query_limits(&self) -> QueryLimits {
        QueryLimits {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_last: self.keep_last,
            keep_for: Duration::from_secs(self.keep_for_mins * 60),
        }
    }

    /// Whether rebuilds can run (a document root is configured)
    pub fn rebuilds_enabled(&self) -> bool {
        self.catalog_path.is_some()
    }

    /// Validate all configuration at startup
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_ttl_secs == 0 {
            return Err("cache_ttl_secs must be greater than 0".to_string());
        }
        if self.reload_timeout_secs == 0 {
            return Err("reload_timeout_secs must be greater than 0".to_string());
        }
        if self.max_limit == 0 {
            return Err("max_limit must be greater than 0".to_string());
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(format!(
                "default_limit must be between 1 and max_limit ({}), got {}",
                self.max_limit, self.default_limit
            ));
        }
        if self.rebuild_on_start && self.catalog_path.is_none() {
            return Err("rebuild_on_start requires --catalog-path".to_string());
        }
        if self.poll_interval().is_some() && self.catalog_path.is_none() {
            return Err("poll_interval_secs requires --catalog-path".to_string());
        }
        Ok(())
    }
}
