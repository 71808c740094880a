//! Centralized configuration for the desktop bridge.
//!
//! Constants live in unit structs the same way the rest of the workspace groups
//! them. Runtime options arrive as [`ServerOptions`] (CLI flags or a JSON file)
//! and are validated into a [`BridgeConfig`] before any socket is opened.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bridge-level defaults.
pub struct BridgeDefaults;

impl BridgeDefaults {
    pub const APP_NAME: &'static str = "What If Store";
    pub const HOST: &'static str = "127.0.0.1";
    pub const PORT: u16 = 3232;
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
    pub const HEALTH_CHECK_PROCEDURE: &'static str = "healthCheck";
    /// Line prefix the binary prints so the desktop shell can discover the port.
    pub const PORT_ANNOUNCE_PREFIX: &'static str = "BRIDGE_PORT=";
}

/// HTTP route layout shared by server and client.
pub struct RouteConfig;

impl RouteConfig {
    pub const RPC_PATH: &'static str = "/rpc";
    pub const STREAM_PATH: &'static str = "/ws";
    pub const HEALTH_PATH: &'static str = "/health";
}

/// Stream transport tuning.
pub struct StreamConfig;

impl StreamConfig {
    /// Outbound frames buffered per connection before the client counts as slow.
    pub const OUTBOUND_BUFFER: usize = 256;
    pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
    pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);
    /// Quiet period after a filesystem event before the app list is re-read.
    pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(250);
}

/// Raw server options as supplied by the caller.
///
/// The port is kept signed so that a negative value supplied by a config file
/// or a CLI flag is reported as a validation error instead of a parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOptions {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub shutdown_timeout_ms: Option<u64>,
    /// Overrides the platform application directories scanned by `apps.*`.
    #[serde(default)]
    pub app_dirs: Option<Vec<PathBuf>>,
}

impl ServerOptions {
    /// Options with only a port set.
    pub fn with_port(port: i64) -> Self {
        Self {
            port: Some(port),
            ..Self::default()
        }
    }

    /// Load options from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| BridgeError::io_with_path(e, path))?;
        serde_json::from_str(&content).map_err(|e| BridgeError::Config {
            message: format!("Invalid config file {}: {}", path.display(), e),
        })
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: ServerOptions) -> Self {
        Self {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            shutdown_timeout_ms: other.shutdown_timeout_ms.or(self.shutdown_timeout_ms),
            app_dirs: other.app_dirs.or(self.app_dirs),
        }
    }

    /// Validate into a bind-ready configuration.
    pub fn validate(&self) -> Result<BridgeConfig> {
        let port = match self.port {
            None => BridgeDefaults::PORT,
            Some(value) => u16::try_from(value).map_err(|_| BridgeError::InvalidPort { value })?,
        };

        let host = self
            .host
            .clone()
            .unwrap_or_else(|| BridgeDefaults::HOST.to_string());
        if host.trim().is_empty() {
            return Err(BridgeError::Config {
                message: "host must not be empty".to_string(),
            });
        }

        let shutdown_timeout = self
            .shutdown_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(BridgeDefaults::SHUTDOWN_TIMEOUT);

        Ok(BridgeConfig {
            host,
            port,
            shutdown_timeout,
            app_dirs: self.app_dirs.clone(),
        })
    }
}

/// Validated bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout: Duration,
    pub app_dirs: Option<Vec<PathBuf>>,
}

impl BridgeConfig {
    /// Resolve the socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|e| BridgeError::Config {
            message: format!("Invalid bind address {}: {}", raw, e),
        })
    }

    /// Application directories to scan: the configured override, or the
    /// platform defaults.
    pub fn resolved_app_dirs(&self) -> Vec<PathBuf> {
        self.app_dirs
            .clone()
            .unwrap_or_else(crate::platform::application_dirs)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: BridgeDefaults::HOST.to_string(),
            port: BridgeDefaults::PORT,
            shutdown_timeout: BridgeDefaults::SHUTDOWN_TIMEOUT,
            app_dirs: None,
        }
    }
}
