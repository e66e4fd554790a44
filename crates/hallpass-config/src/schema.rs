//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Destination catalog seeds, upserted into the store at startup
    #[serde(default)]
    pub destinations: Vec<RawDestination>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path (default: per-user runtime dir)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Log directory
    pub log_dir: Option<PathBuf>,

    /// Seconds between auto-return sweeps (default 60)
    pub sweep_interval_seconds: Option<u64>,
}

/// Raw destination definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawDestination {
    /// Unique stable ID
    pub id: String,

    /// Display name
    pub name: String,

    /// Inactive destinations stay in the catalog but reject checkouts
    #[serde(default = "default_active")]
    pub active: bool,

    /// Display ordering hint, ascending
    #[serde(default)]
    pub sort_order: i64,
}

fn default_active() -> bool {
    true
}
