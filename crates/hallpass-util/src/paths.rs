//! Default paths for hallpassd components
//!
//! Provides centralized path defaults that all crates can use.
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/hallpassd/hallpassd.sock` or `/tmp/hallpassd-$USER/hallpassd.sock`
//! - Data: `$XDG_DATA_HOME/hallpassd` or `~/.local/share/hallpassd`
//! - Logs: `$XDG_STATE_HOME/hallpassd` or `~/.local/state/hallpassd`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const HALLPASS_SOCKET_ENV: &str = "HALLPASS_SOCKET";

/// Environment variable for overriding the data directory
pub const HALLPASS_DATA_DIR_ENV: &str = "HALLPASS_DATA_DIR";

/// Environment variable for overriding the config file path
pub const HALLPASS_CONFIG_ENV: &str = "HALLPASS_CONFIG";

/// Socket filename within the socket directory
const SOCKET_FILENAME: &str = "hallpassd.sock";

/// Application subdirectory name
const APP_DIR: &str = "hallpassd";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$HALLPASS_SOCKET` environment variable (if set)
/// 2. `$XDG_RUNTIME_DIR/hallpassd/hallpassd.sock` (if XDG_RUNTIME_DIR is set)
/// 3. `/tmp/hallpassd-$USER/hallpassd.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(HALLPASS_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Get the socket path without checking HALLPASS_SOCKET env var.
/// Used for default values in configs where the env var is checked separately.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$HALLPASS_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/hallpassd` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/hallpassd` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(HALLPASS_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking HALLPASS_DATA_DIR env var.
/// Used for default values in configs where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default log directory.
///
/// Order of precedence:
/// 1. `$XDG_STATE_HOME/hallpassd` (if XDG_STATE_HOME is set)
/// 2. `~/.local/state/hallpassd` (fallback)
pub fn default_log_dir() -> PathBuf {
    if let Ok(state_home) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(state_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("logs")
}

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$HALLPASS_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/hallpassd/config.toml` (if XDG_CONFIG_HOME is set)
/// 3. `~/.config/hallpassd/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(HALLPASS_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(APP_DIR).join("config.toml")
}

/// Get the parent directory of the socket (for creating it)
pub fn socket_dir() -> PathBuf {
    let socket_path = socket_path_without_env();
    socket_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/tmp").join(APP_DIR))
}
