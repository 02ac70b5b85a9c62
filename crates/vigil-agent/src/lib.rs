//! # vigil-agent
//!
//! Host monitoring agent for the vigil hub.
//!
//! The agent runs on each monitored host and answers requests from the hub:
//! system statistics, container logs and control, and disk health. Requests
//! arrive over a Unix socket or a remote-shell channel and are routed by an
//! integer action code to a registered handler.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        vigil-agent                        │
//! ├───────────────────────────────────────────────────────────┤
//! │                                                           │
//! │  ┌──────────────────┐       ┌──────────────────────────┐  │
//! │  │ transport::socket│──┐    │ HubSession               │  │
//! │  │ transport::shell │  │    │  - identity challenge    │  │
//! │  └──────────────────┘  │    │  - verification flag     │  │
//! │                        ▼    └──────────────────────────┘  │
//! │               ┌─────────────────┐                         │
//! │               │ HandlerRegistry │── gate ──▶ handlers     │
//! │               └─────────────────┘              │          │
//! │                                                ▼          │
//! │  ┌──────────────────────────────────────────────────────┐ │
//! │  │ Agent: stats | containers (docker) | disk health     │ │
//! │  └──────────────────────────────────────────────────────┘ │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use vigil_agent::{Agent, AgentConfig, Dispatcher, HandlerRegistry, TokenAuthenticator};
//!
//! # async fn example() -> std::io::Result<()> {
//! let config = AgentConfig::from_env();
//! let dispatcher = Dispatcher::new(
//!     Arc::new(HandlerRegistry::with_default_handlers()),
//!     Arc::new(Agent::from_config(&config).await),
//!     Arc::new(TokenAuthenticator::new(config.hub_token.clone(), "host-fp")),
//! );
//! let listener = vigil_agent::transport::socket::bind(&config.socket_path)?;
//! vigil_agent::transport::socket::serve(listener, dispatcher, std::future::pending()).await
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod container;
pub mod disk_health;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use agent::{Agent, Subsystem};
pub use config::{AgentConfig, ConfigError, TransportMode};
pub use container::{ContainerError, ContainerRuntime, DockerClient};
pub use disk_health::{DiskHealth, DiskHealthError, HealthRecord, SmartctlMonitor};
pub use dispatch::{
    HandlerContext, HandlerRegistry, RequestEnvelope, RequestHandler, Responder, Session,
};
pub use error::{AgentError, Result};
pub use protocol::{Action, AgentResponse, HubRequest};
pub use session::{HubSession, TokenAuthenticator, VerificationFlag};
pub use stats::{HostStatsCollector, StatsProvider, SystemStats};
pub use transport::Dispatcher;
