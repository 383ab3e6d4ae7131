use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vtest_common::platform;
use vtest_protocol::command::{MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};

use crate::error::CoreError;

/// Environment variable overriding the server socket path.
pub const SOCKET_NAME_ENV: &str = "VTEST_SOCKET_NAME";

/// Environment variable overriding the announced renderer name.
pub const RENDERER_NAME_ENV: &str = "VTEST_RENDERER_NAME";

/// Longest path a `sockaddr_un` can carry, without the terminating nul.
const MAX_SOCKET_PATH: usize = 107;

/// Client configuration, loaded from vtest.toml.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VtestConfig {
    /// Path of the rendering server's stream socket
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    /// Name announced in the create-renderer frame (None = process name)
    #[serde(default)]
    pub renderer_name: Option<String>,
    /// Protocol version requested during the handshake
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

impl Default for VtestConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            renderer_name: None,
            protocol_version: default_protocol_version(),
        }
    }
}

impl VtestConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let config: VtestConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(CoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path);
                Self::default()
            }
            Err(e) => {
                warn!("ignoring config {}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Apply `VTEST_SOCKET_NAME` and `VTEST_RENDERER_NAME` on top of this config.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var(SOCKET_NAME_ENV) {
            if !path.is_empty() {
                self.socket_path = path;
            }
        }
        if let Ok(name) = std::env::var(RENDERER_NAME_ENV) {
            if !name.is_empty() {
                self.renderer_name = Some(name);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.socket_path.is_empty() {
            return Err(CoreError::ConfigError("socket_path is empty".to_string()));
        }
        if self.socket_path.len() > MAX_SOCKET_PATH {
            return Err(CoreError::ConfigError(format!(
                "socket_path is {} bytes, at most {} fit a unix socket address",
                self.socket_path.len(),
                MAX_SOCKET_PATH
            )));
        }
        Ok(())
    }

    /// Version to request from the host; never below the supported minimum.
    pub fn requested_protocol_version(&self) -> u32 {
        self.protocol_version.max(MIN_PROTOCOL_VERSION)
    }

    /// Name to announce to the host.
    pub fn resolved_renderer_name(&self) -> String {
        self.renderer_name
            .clone()
            .unwrap_or_else(platform::renderer_name)
    }
}

/// Returns the default config file path.
/// Search order:
/// 1. System-wide config: `/etc/vtest/vtest.toml`
/// 2. Local fallback: `./vtest.toml`
pub fn default_config_path() -> String {
    let system_path = "/etc/vtest/vtest.toml";
    if std::path::Path::new(system_path).exists() {
        return system_path.to_string();
    }
    "vtest.toml".to_string()
}

fn default_socket_path() -> String {
    platform::default_socket_path()
}

fn default_protocol_version() -> u32 {
    PROTOCOL_VERSION
}
