//! Configuration file support.
//!
//! Loads server configuration from `.geocat/config.toml` (or `config.json`)
//! and merges it with CLI args and environment variables. Server settings
//! live under the `[server]` table with `[server.cache]`, `[server.indexer]`
//! and `[server.search]` sub-tables.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI arguments
//! 2. Environment variables
//! 3. Profile overlay (`[profiles.<name>.server]`)
//! 4. Config file (`[server]`)
//! 5. Hardcoded defaults

use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;

/// Directory searched for config files
pub const GEOCAT_DIR: &str = ".geocat";

const CONFIG_FILE_NAMES: &[&str] = &["config.toml", "config.json"];

// ---------------------------------------------------------------------------
// File config serde types (all Option: absence means "not set in file")
// ---------------------------------------------------------------------------

/// Top-level config file structure
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GeocatFileConfig {
    /// `[server]`
    #[serde(default)]
    pub server: Option<ServerFileConfig>,

    /// `[profiles.<name>]`
    #[serde(default)]
    pub profiles: Option<HashMap<String, ProfileConfig>>,
}

/// A named profile containing server overrides.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProfileConfig {
    /// `[profiles.<name>.server]`
    #[serde(default)]
    pub server: Option<ServerFileConfig>,
}

/// The `[server]` table. Every field is `Option` so the file only needs to
/// contain values the user wants to set.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ServerFileConfig {
    pub listen_addr: Option<String>,
    pub index_path: Option<String>,
    pub catalog_path: Option<String>,
    pub log_level: Option<String>,
    pub cors_enabled: Option<bool>,
    pub public_url: Option<String>,
    pub crs_registry: Option<String>,
    pub catalog_title: Option<String>,
    pub catalog_description: Option<String>,

    pub cache: Option<CacheFileConfig>,
    pub indexer: Option<IndexerFileConfig>,
    pub search: Option<SearchFileConfig>,
}

/// `[server.cache]`
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct CacheFileConfig {
    pub ttl_secs: Option<u64>,
    pub reload_timeout_secs: Option<u64>,
    pub max_age: Option<u64>,
}

/// `[server.indexer]`
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct IndexerFileConfig {
    pub keep_last: Option<usize>,
    pub keep_for_mins: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub rebuild_on_start: Option<bool>,
}

/// `[server.search]`
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct SearchFileConfig {
    pub default_limit: Option<usize>,
    pub max_limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Config file loading
// ---------------------------------------------------------------------------

/// Load a config file from the given path. Detects format by extension:
/// `.json` → JSON, everything else → TOML.
pub fn load_config(path: &Path) -> Result<GeocatFileConfig, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    if content.trim().is_empty() {
        return Ok(GeocatFileConfig::default());
    }

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content).map_err(|e| ConfigFileError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    } else {
        toml::from_str(&content).map_err(|e| ConfigFileError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

/// Errors from config file loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {detail}")]
    Parse { path: PathBuf, detail: String },
    #[error("Profile '{name}' not found in config file")]
    ProfileNotFound { name: String },
}

// ---------------------------------------------------------------------------
// Config file discovery
// ---------------------------------------------------------------------------

fn find_config_in_dir(dir: &Path) -> Option<PathBuf> {
    let mut found = CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .filter(|p| p.is_file());
    let first = found.next()?;
    if found.next().is_some() {
        warn!(
            dir = %dir.display(),
            "Both config.toml and config.json found; using config.toml"
        );
    }
    Some(first)
}

/// Resolve the config file path.
///
/// 1. Use explicit `--config` override if provided
/// 2. Walk up from cwd looking for `.geocat/config.{toml,json}`
/// 3. Check `~/.geocat/config.{toml,json}` as global fallback
///
/// Returns `None` if no config file is found (this is not an error).
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        if p.is_file() {
            return Some(p.to_path_buf());
        }
        if p.is_dir() {
            if let Some(found) = find_config_in_dir(p) {
                return Some(found);
            }
        }
        if let Some(found) = find_config_in_dir(&p.join(GEOCAT_DIR)) {
            return Some(found);
        }
        warn!(path = %p.display(), "Config file not found at specified path");
        return None;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut current = cwd;
        loop {
            if let Some(found) = find_config_in_dir(&current.join(GEOCAT_DIR)) {
                return Some(found);
            }
            if !current.pop() {
                break;
            }
        }
    }

    dirs::home_dir().and_then(|home| find_config_in_dir(&home.join(GEOCAT_DIR)))
}

// ---------------------------------------------------------------------------
// Deep merge (profile overlay onto base)
// ---------------------------------------------------------------------------

/// Deep-merge `overlay` onto `base`. Only `Some` values in the overlay replace
/// the corresponding base values; `None` in the overlay means "inherit from base".
pub fn deep_merge(base: &mut ServerFileConfig, overlay: &ServerFileConfig) {
    macro_rules! merge_field {
        ($base:expr, $overlay:expr, $($field:ident),+) => {
            $(
                if $overlay.$field.is_some() {
                    $base.$field = $overlay.$field.clone();
                }
            )+
        };
    }

    merge_field!(
        base,
        overlay,
        listen_addr,
        index_path,
        catalog_path,
        log_level,
        cors_enabled,
        public_url,
        crs_registry,
        catalog_title,
        catalog_description
    );

    if let Some(ref ovr) = overlay.cache {
        let b = base.cache.get_or_insert_with(Default::default);
        merge_field!(b, ovr, ttl_secs, reload_timeout_secs, max_age);
    }

    if let Some(ref ovr) = overlay.indexer {
        let b = base.indexer.get_or_insert_with(Default::default);
        merge_field!(
            b,
            ovr,
            keep_last,
            keep_for_mins,
            poll_interval_secs,
            rebuild_on_start
        );
    }

    if let Some(ref ovr) = overlay.search {
        let b = base.search.get_or_insert_with(Default::default);
        merge_field!(b, ovr, default_limit, max_limit);
    }
}

// ---------------------------------------------------------------------------
// Apply file values to ServerConfig
// ---------------------------------------------------------------------------

/// Every clap arg ID that `apply_to_server_config` consults.
pub const CONFIG_FILE_ARG_IDS: &[&str] = &[
    "listen_addr",
    "index_path",
    "catalog_path",
    "log_level",
    "cors_enabled",
    "public_url",
    "crs_registry",
    "catalog_title",
    "catalog_description",
    "cache_ttl_secs",
    "reload_timeout_secs",
    "cache_max_age",
    "keep_last",
    "keep_for_mins",
    "poll_interval_secs",
    "rebuild_on_start",
    "default_limit",
    "max_limit",
];

/// Apply config file values to a `ServerConfig`, but only for fields where
/// the user did NOT provide a CLI argument or environment variable.
pub fn apply_to_server_config(
    file: &ServerFileConfig,
    config: &mut ServerConfig,
    matches: &ArgMatches,
) {
    use clap::parser::ValueSource;

    // Scalars with `default_value` report Some(DefaultValue); Options without
    // a default report None.
    let is_default = |arg_name: &str| -> bool {
        matches!(
            matches.value_source(arg_name),
            None | Some(ValueSource::DefaultValue)
        )
    };

    macro_rules! apply {
        ($id:literal, $value:expr => $target:expr) => {
            if is_default($id) {
                if let Some(v) = $value {
                    $target = v.clone().into();
                }
            }
        };
    }

    if is_default("listen_addr") {
        if let Some(ref addr_str) = file.listen_addr {
            match addr_str.parse::<SocketAddr>() {
                Ok(addr) => config.listen_addr = addr,
                Err(_) => warn!(
                    value = addr_str,
                    "Invalid listen_addr in config file, ignoring"
                ),
            }
        }
    }
    apply!("index_path", file.index_path.as_ref() => config.index_path);
    if is_default("catalog_path") {
        if let Some(ref path) = file.catalog_path {
            config.catalog_path = Some(PathBuf::from(path));
        }
    }
    apply!("log_level", file.log_level.as_ref() => config.log_level);
    apply!("cors_enabled", file.cors_enabled.as_ref() => config.cors_enabled);
    if is_default("public_url") {
        if let Some(ref url) = file.public_url {
            config.public_url = Some(url.clone());
        }
    }
    if is_default("crs_registry") {
        if let Some(ref path) = file.crs_registry {
            config.crs_registry = Some(PathBuf::from(path));
        }
    }
    apply!("catalog_title", file.catalog_title.as_ref() => config.catalog_title);
    apply!("catalog_description", file.catalog_description.as_ref() => config.catalog_description);

    if let Some(ref cache) = file.cache {
        apply!("cache_ttl_secs", cache.ttl_secs.as_ref() => config.cache_ttl_secs);
        apply!("reload_timeout_secs", cache.reload_timeout_secs.as_ref() => config.reload_timeout_secs);
        apply!("cache_max_age", cache.max_age.as_ref() => config.cache_max_age);
    }

    if let Some(ref indexer) = file.indexer {
        apply!("keep_last", indexer.keep_last.as_ref() => config.keep_last);
        apply!("keep_for_mins", indexer.keep_for_mins.as_ref() => config.keep_for_mins);
        if is_default("poll_interval_secs") {
            if let Some(secs) = indexer.poll_interval_secs {
                config.poll_interval_secs = Some(secs);
            }
        }
        apply!("rebuild_on_start", indexer.rebuild_on_start.as_ref() => config.rebuild_on_start);
    }

    if let Some(ref search) = file.search {
        apply!("default_limit", search.default_limit.as_ref() => config.default_limit);
        apply!("max_limit", search.max_limit.as_ref() => config.max_limit);
    }
}

/// Resolve, load and apply the config file (with profile overlay).
pub fn load_and_merge_config(
    config: &mut ServerConfig,
    matches: &ArgMatches,
) -> Result<(), ConfigFileError> {
    let Some(path) = resolve_config_path(config.config_file.as_deref()) else {
        debug!("No config file found, using CLI args and defaults only");
        return Ok(());
    };

    info!(path = %path.display(), "Loading configuration file");

    let file_config = load_config(&path)?;
    let mut server_section = file_config.server.unwrap_or_default();

    if let Some(ref profile_name) = config.profile {
        let overlay = file_config
            .profiles
            .as_ref()
            .and_then(|profiles| profiles.get(profile_name))
            .ok_or_else(|| ConfigFileError::ProfileNotFound {
                name: profile_name.clone(),
            })?;
        if let Some(ref overlay) = overlay.server {
            info!(profile = profile_name, "Applying configuration profile");
            deep_merge(&mut server_section, overlay);
        }
    }

    apply_to_server_config(&server_section, config, matches);

    Ok(())
}
