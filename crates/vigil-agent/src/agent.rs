//! Shared agent state handed to every request.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::container::{ContainerRuntime, DockerClient};
use crate::disk_health::{DiskHealth, SmartctlMonitor};
use crate::stats::{HostStatsCollector, StatsProvider};

/// A handle to an optional subsystem.
///
/// Some hosts have no container runtime or no SMART tooling. Handlers check
/// availability at the point of use and pick their own fallback.
pub struct Subsystem<T: ?Sized>(Option<Arc<T>>);

impl<T: ?Sized> Subsystem<T> {
    /// A present subsystem.
    pub fn present(handle: Arc<T>) -> Self {
        Self(Some(handle))
    }

    /// An absent subsystem.
    pub fn absent() -> Self {
        Self(None)
    }

    /// The handle, if present.
    pub fn get(&self) -> Option<&Arc<T>> {
        self.0.as_ref()
    }

    /// Whether the subsystem is present.
    pub fn is_available(&self) -> bool {
        self.0.is_some()
    }
}

impl<T: ?Sized> Default for Subsystem<T> {
    fn default() -> Self {
        Self::absent()
    }
}

impl<T: ?Sized> Clone for Subsystem<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ?Sized> fmt::Debug for Subsystem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_available() { "present" } else { "absent" })
    }
}

/// Subsystems available to request handlers.
///
/// Shared behind an `Arc` by all connections. Handlers only ever read it.
pub struct Agent {
    stats: Arc<dyn StatsProvider>,
    containers: Subsystem<dyn ContainerRuntime>,
    disk_health: Subsystem<dyn DiskHealth>,
}

impl Agent {
    /// Create an agent with only the stats provider.
    pub fn new(stats: Arc<dyn StatsProvider>) -> Self {
        Self {
            stats,
            containers: Subsystem::absent(),
            disk_health: Subsystem::absent(),
        }
    }

    /// Attach a container runtime.
    pub fn with_containers(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.containers = Subsystem::present(runtime);
        self
    }

    /// Attach a disk health source.
    pub fn with_disk_health(mut self, monitor: Arc<dyn DiskHealth>) -> Self {
        self.disk_health = Subsystem::present(monitor);
        self
    }

    /// Build the agent for this host, probing the optional subsystems.
    pub async fn from_config(config: &AgentConfig) -> Self {
        let mut agent = Self::new(Arc::new(HostStatsCollector::new()));

        if config.docker_enabled {
            if let Some(docker) = probe_docker(&config.docker_socket).await {
                agent = agent.with_containers(Arc::new(docker));
            }
        }

        if config.disk_health_enabled {
            if let Some(monitor) =
                SmartctlMonitor::probe(&config.smartctl_path, config.disk_refresh_interval).await
            {
                agent = agent.with_disk_health(Arc::new(monitor));
            }
        }

        tracing::info!(
            containers = ?agent.containers,
            disk_health = ?agent.disk_health,
            "agent subsystems ready"
        );
        agent
    }

    /// Stats provider.
    pub fn stats(&self) -> &dyn StatsProvider {
        self.stats.as_ref()
    }

    /// Container runtime, if present on this host.
    pub fn containers(&self) -> &Subsystem<dyn ContainerRuntime> {
        &self.containers
    }

    /// Disk health source, if present on this host.
    pub fn disk_health(&self) -> &Subsystem<dyn DiskHealth> {
        &self.disk_health
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("containers", &self.containers)
            .field("disk_health", &self.disk_health)
            .finish_non_exhaustive()
    }
}

async fn probe_docker(socket: &Path) -> Option<DockerClient> {
    if !socket.exists() {
        tracing::debug!(socket = %socket.display(), "docker socket not found, containers disabled");
        return None;
    }
    let client = DockerClient::new(socket);
    match client.ping().await {
        Ok(()) => {
            tracing::info!(socket = %socket.display(), "container monitoring enabled");
            Some(client)
        }
        Err(e) => {
            tracing::warn!(socket = %socket.display(), error = %e, "docker daemon not responding, containers disabled");
            None
        }
    }
}
