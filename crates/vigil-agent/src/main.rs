//! vigil-agent entry point.
//!
//! ## Transport Modes
//!
//! - **socket** (default): listens on a Unix socket for hub connections
//! - **stdio**: serves a single remote-shell channel on stdin/stdout

use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vigil_agent::session::resolve_fingerprint;
use vigil_agent::transport::{shell, socket};
use vigil_agent::{
    Agent, AgentConfig, Dispatcher, HandlerRegistry, TokenAuthenticator, TransportMode,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr (stdout is the shell channel in stdio mode)
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("vigil_agent=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting vigil-agent");

    let config = AgentConfig::from_env();
    tracing::info!(?config, "Configuration loaded");
    config.validate_warn();
    config.validate()?;

    let fingerprint = resolve_fingerprint(config.fingerprint.as_deref());
    let dispatcher = Dispatcher::new(
        Arc::new(HandlerRegistry::with_default_handlers()),
        Arc::new(Agent::from_config(&config).await),
        Arc::new(TokenAuthenticator::new(config.hub_token.clone(), fingerprint)),
    );

    match config.transport_mode {
        TransportMode::Socket => {
            let listener = socket::bind(&config.socket_path)?;
            tracing::info!(path = %config.socket_path.display(), "Listening for hub connections");

            let shutdown = async {
                if let Err(e) = signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
            };
            socket::serve(listener, dispatcher, shutdown).await?;

            if let Err(e) = std::fs::remove_file(&config.socket_path) {
                tracing::debug!(error = %e, "Failed to remove socket file");
            }
        }
        TransportMode::Stdio => {
            tracing::info!("Serving shell channel on stdin/stdout");
            tokio::select! {
                result = shell::serve_channel(tokio::io::stdin(), tokio::io::stdout(), dispatcher) => result?,
                _ = signal::ctrl_c() => tracing::info!("Received shutdown signal"),
            }
        }
    }

    tracing::info!("vigil-agent stopped");
    Ok(())
}
