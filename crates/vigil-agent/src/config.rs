//! Configuration for the agent.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::container::DEFAULT_DOCKER_SOCKET;
use crate::disk_health::DEFAULT_REFRESH_INTERVAL;

/// Default path of the hub-facing socket.
pub const DEFAULT_SOCKET_PATH: &str = "/run/vigil/agent.sock";

/// How the agent is reached by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Persistent Unix socket connections (default).
    #[default]
    Socket,
    /// A single remote-shell channel on stdin/stdout.
    Stdio,
}

impl TransportMode {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "stdio" | "ssh" | "shell" => Self::Stdio,
            _ => Self::Socket,
        }
    }
}

/// Configuration for the vigil agent.
#[derive(Clone)]
pub struct AgentConfig {
    /// Transport used to reach the hub.
    pub transport_mode: TransportMode,

    /// Path of the hub-facing Unix socket.
    pub socket_path: PathBuf,

    /// Shared token the hub presents in the identity challenge.
    pub hub_token: String,

    /// Fingerprint override; derived from the host when unset.
    pub fingerprint: Option<String>,

    /// Docker daemon socket.
    pub docker_socket: PathBuf,

    /// Enable container monitoring (default: true).
    pub docker_enabled: bool,

    /// smartctl executable.
    pub smartctl_path: PathBuf,

    /// Enable disk health monitoring (default: true).
    pub disk_health_enabled: bool,

    /// Minimum interval between disk health refreshes.
    pub disk_refresh_interval: Duration,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("VIGIL_HUB_TOKEN is not set")]
    MissingHubToken,

    #[error("socket directory not found: {0}")]
    InvalidSocketDir(PathBuf),
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            transport_mode: TransportMode::Socket,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            hub_token: String::new(),
            fingerprint: None,
            docker_socket: PathBuf::from(DEFAULT_DOCKER_SOCKET),
            docker_enabled: true,
            smartctl_path: PathBuf::from("smartctl"),
            disk_health_enabled: true,
            disk_refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

// Keep the hub token out of logs.
impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("transport_mode", &self.transport_mode)
            .field("socket_path", &self.socket_path)
            .field("hub_token", &"<redacted>")
            .field("fingerprint", &self.fingerprint)
            .field("docker_socket", &self.docker_socket)
            .field("docker_enabled", &self.docker_enabled)
            .field("smartctl_path", &self.smartctl_path)
            .field("disk_health_enabled", &self.disk_health_enabled)
            .field("disk_refresh_interval", &self.disk_refresh_interval)
            .finish()
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `VIGIL_TRANSPORT` | `socket` (socket, stdio) |
    /// | `VIGIL_SOCKET` | `/run/vigil/agent.sock` |
    /// | `VIGIL_HUB_TOKEN` | *(required for socket mode)* |
    /// | `VIGIL_FINGERPRINT` | machine id, else host name |
    /// | `VIGIL_DOCKER_SOCKET` | `/var/run/docker.sock` |
    /// | `VIGIL_DOCKER_ENABLED` | `true` |
    /// | `VIGIL_SMARTCTL` | `smartctl` |
    /// | `VIGIL_DISK_HEALTH` | `true` |
    /// | `VIGIL_DISK_REFRESH_SECS` | `3600` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| v != "false" && v != "0")
                .unwrap_or(default)
        };

        Self {
            transport_mode: lookup("VIGIL_TRANSPORT")
                .map(|v| TransportMode::parse(&v))
                .unwrap_or(default.transport_mode),
            socket_path: lookup("VIGIL_SOCKET")
                .map(PathBuf::from)
                .unwrap_or(default.socket_path),
            hub_token: lookup("VIGIL_HUB_TOKEN").unwrap_or(default.hub_token),
            fingerprint: lookup("VIGIL_FINGERPRINT").filter(|v| !v.trim().is_empty()),
            docker_socket: lookup("VIGIL_DOCKER_SOCKET")
                .map(PathBuf::from)
                .unwrap_or(default.docker_socket),
            docker_enabled: flag("VIGIL_DOCKER_ENABLED", default.docker_enabled),
            smartctl_path: lookup("VIGIL_SMARTCTL")
                .map(PathBuf::from)
                .unwrap_or(default.smartctl_path),
            disk_health_enabled: flag("VIGIL_DISK_HEALTH", default.disk_health_enabled),
            disk_refresh_interval: lookup("VIGIL_DISK_REFRESH_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.disk_refresh_interval),
        }
    }

    /// Validate settings needed by the configured transport.
    ///
    /// Call this at startup to get clear error messages.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport_mode == TransportMode::Socket {
            if self.hub_token.is_empty() {
                return Err(ConfigError::MissingHubToken);
            }
            if let Some(parent) = self.socket_path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::InvalidSocketDir(parent.to_path_buf()));
                }
            }
        }
        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if self.docker_enabled && !self.docker_socket.exists() {
            tracing::warn!("Docker socket not found: {:?}", self.docker_socket);
        }
        if self.transport_mode == TransportMode::Stdio && !self.hub_token.is_empty() {
            tracing::warn!("VIGIL_HUB_TOKEN is ignored in stdio mode");
        }
    }
}
