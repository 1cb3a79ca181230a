//! Viewer configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use spice_core::{DEFAULT_TICKET, Geometry, SessionOptions};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Server endpoint and credentials.
    pub network: NetworkConfig,
    /// Local view and frame output.
    pub display: DisplayConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server IP literal (v4 or v6).
    pub address: String,
    pub port: u16,
    /// Ticket sent during every channel link.
    pub ticket: String,
    /// Main-channel setup timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Local view width, used to rescale pointer positions.
    pub width: u32,
    /// Local view height.
    pub height: u32,
    /// If set, every finished frame is written here as a BMP.
    pub dump_path: String,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 5900,
            ticket: DEFAULT_TICKET.into(),
            timeout_ms: 5000,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            dump_path: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// Where a loaded [`ViewerConfig`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No readable file; defaults in use.
    Missing,
    /// The file did not parse; defaults in use.
    Invalid(String),
}

impl ConfigSource {
    /// Report the outcome. Call once logging is initialised.
    pub fn log(&self, path: &Path) {
        match self {
            Self::File => tracing::info!("config loaded from {}", path.display()),
            Self::Missing => tracing::info!("no config at {}; using defaults", path.display()),
            Self::Invalid(e) => {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display())
            }
        }
    }
}

impl ViewerConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> (Self, ConfigSource) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(cfg) => (cfg, ConfigSource::File),
                Err(e) => (Self::default(), ConfigSource::Invalid(e.to_string())),
            },
            Err(_) => (Self::default(), ConfigSource::Missing),
        }
    }

    /// Session parameters for `spice_core::Session::init`.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            address: self.network.address.clone(),
            port: self.network.port,
            ticket: self.network.ticket.clone(),
            local_geometry: Geometry::new(self.display.width, self.display.height),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
