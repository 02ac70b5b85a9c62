//! Error types for vigil-client.

use thiserror::Error;

/// Result type alias for vigil-client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to an agent.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to connect to the agent
    #[error("connection failed: {0}")]
    Connection(String),

    /// Agent closed the connection
    #[error("connection closed by agent")]
    Closed,

    /// Agent did not answer in time
    #[error("agent timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Error frame from the agent
    #[error("agent error: {0}")]
    Agent(String),

    /// Success frame without a result
    #[error("missing result in response {0}")]
    MissingResult(u32),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
