//! Error types for vigil-agent.

use crate::container::ContainerError;
use crate::protocol::Action;
use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that terminate a single request.
///
/// None of these are fatal to the agent: the transport reports them to the hub
/// as an error frame and keeps serving the connection.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No handler is registered for the action code.
    #[error("unknown action: {0}")]
    UnknownAction(u32),

    /// The hub has not completed the identity challenge on this connection.
    #[error("hub not verified")]
    Unverified,

    /// The action payload could not be decoded.
    #[error("invalid {action} payload: {source}")]
    Decode {
        /// Action whose payload was rejected
        action: Action,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },

    /// An optional subsystem is not present on this host.
    #[error("{0} not available")]
    Unavailable(&'static str),

    /// The container runtime rejected or failed the call.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// The identity challenge failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A handler returned success without delivering a response.
    #[error("handler for {0} returned without responding")]
    NoResponse(Action),

    /// A handler tried to deliver a second response.
    #[error("response already delivered for this request")]
    AlreadyResponded,

    /// The response could not be written back to the hub.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response serialization failed.
    #[error("failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl AgentError {
    /// Build a decode error for `action`.
    pub fn decode(action: Action, source: serde_json::Error) -> Self {
        Self::Decode { action, source }
    }
}
