//! The decoded unit of work handed to the registry.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::{AgentError, Result};
use crate::protocol::{Action, HubRequest};

/// An action code plus its still-encoded payload.
///
/// The dispatch layer never looks inside `data`; each handler decodes the
/// payload type it owns.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    /// Numeric action code as received on the wire.
    pub action: u32,
    /// Opaque action-specific payload.
    pub data: Bytes,
}

impl RequestEnvelope {
    /// Create an envelope from a raw code and payload.
    pub fn new(action: u32, data: impl Into<Bytes>) -> Self {
        Self {
            action,
            data: data.into(),
        }
    }

    /// Split a wire frame into its correlation id and envelope.
    pub fn from_frame(frame: HubRequest) -> Result<(Option<u32>, Self)> {
        let data = serde_json::to_vec(&frame.data)?;
        Ok((frame.id, Self::new(frame.action, data)))
    }

    /// Decode the payload strictly. Failures abort the request.
    pub fn decode<T: DeserializeOwned>(&self, action: Action) -> Result<T> {
        serde_json::from_slice(&self.data).map_err(|e| AgentError::decode(action, e))
    }

    /// Decode the payload, substituting defaults for a missing or malformed one.
    pub fn decode_or_default<T: DeserializeOwned + Default>(&self) -> T {
        match serde_json::from_slice(&self.data) {
            Ok(value) => value,
            Err(e) => {
                trace!(action = self.action, error = %e, "using default options");
                T::default()
            }
        }
    }
}
