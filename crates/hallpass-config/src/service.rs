//! Validated configuration structures

use crate::schema::{RawConfig, RawDestination, RawServiceConfig};
use hallpass_api::Destination;
use hallpass_util::DestinationId;
use std::path::PathBuf;
use std::time::Duration;

/// Validated configuration ready for use by the daemon
#[derive(Debug, Clone)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Destination catalog seeds
    pub destinations: Vec<Destination>,
}

impl Config {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let destinations = raw.destinations.into_iter().map(convert_destination).collect();

        Self {
            service: ServiceConfig::from_raw(raw.service),
            destinations,
        }
    }

    /// Get a seeded destination by ID
    pub fn get_destination(&self, id: &DestinationId) -> Option<&Destination> {
        self.destinations.iter().find(|d| &d.id == id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            destinations: Vec::new(),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Cadence of the scheduled auto-return sweep
    pub sweep_interval: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(hallpass_util::socket_path_without_env),
            data_dir: raw
                .data_dir
                .unwrap_or_else(hallpass_util::data_dir_without_env),
            log_dir: raw.log_dir.unwrap_or_else(hallpass_util::default_log_dir),
            sweep_interval: Duration::from_secs(raw.sweep_interval_seconds.unwrap_or(60)),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: hallpass_util::socket_path_without_env(),
            data_dir: hallpass_util::data_dir_without_env(),
            log_dir: hallpass_util::default_log_dir(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

fn convert_destination(raw: RawDestination) -> Destination {
    Destination {
        id: DestinationId::new(raw.id),
        name: raw.name,
        active: raw.active,
        sort_order: raw.sort_order,
    }
}
