//! Wire protocol types shared by the agent and the hub.
//!
//! Frames are newline-delimited JSON. The hub sends a [`HubRequest`] carrying a
//! numeric action code and an action-specific `data` payload; the agent answers
//! with an [`AgentResponse`] echoing the request id.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum size of a single inbound frame in bytes (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default grace period for stop and restart requests.
pub const DEFAULT_STOP_TIMEOUT_SECS: u32 = 10;

/// Literal acknowledgement delivered by the container control actions.
pub const ACK: &str = "ok";

/// Request kinds understood by the agent.
///
/// The numeric codes are part of the wire contract with the hub and must not be
/// reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Action {
    /// Gather a system stats snapshot.
    GetData = 0,
    /// Identity challenge issued by the hub.
    CheckFingerprint = 1,
    /// Fetch recent container logs.
    GetContainerLogs = 2,
    /// Fetch container inspect data.
    GetContainerInfo = 3,
    /// Fetch disk health (SMART) data.
    GetSmartData = 4,
    /// Start a container.
    StartContainer = 5,
    /// Stop a container.
    StopContainer = 6,
    /// Restart a container.
    RestartContainer = 7,
}

impl Action {
    /// Every known action, in code order.
    pub const ALL: [Action; 8] = [
        Action::GetData,
        Action::CheckFingerprint,
        Action::GetContainerLogs,
        Action::GetContainerInfo,
        Action::GetSmartData,
        Action::StartContainer,
        Action::StopContainer,
        Action::RestartContainer,
    ];

    /// Map a wire code onto a known action.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.code() == code)
    }

    /// The wire code of this action.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Whether this action may run before the hub has been verified.
    ///
    /// Only the identity challenge is exempt: verification has to be reachable
    /// before it has succeeded.
    pub fn requires_verification(self) -> bool {
        self != Action::CheckFingerprint
    }

    /// Stable name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetData => "get_data",
            Self::CheckFingerprint => "check_fingerprint",
            Self::GetContainerLogs => "get_container_logs",
            Self::GetContainerInfo => "get_container_info",
            Self::GetSmartData => "get_smart_data",
            Self::StartContainer => "start_container",
            Self::StopContainer => "stop_container",
            Self::RestartContainer => "restart_container",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request frame sent by the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubRequest {
    /// Correlation id, absent for fire-and-forget requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Numeric action code.
    pub action: u32,
    /// Action-specific payload.
    #[serde(default)]
    pub data: Value,
}

/// Response frame sent by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Request id this frame answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    /// Create a success response.
    pub fn success(id: Option<u32>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }

    /// True if this frame carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// Payload types for the individual actions

/// Options for `GetData`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequestOptions {
    /// Maximum age of a cached snapshot in milliseconds (0 = always fresh).
    #[serde(default)]
    pub cache_time_ms: u64,
}

/// Identity challenge sent by the hub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintRequest {
    /// Shared hub token.
    #[serde(default)]
    pub token: String,
    /// Ask the agent to include host details in the response.
    #[serde(default)]
    pub need_sys_info: bool,
}

/// Agent answer to a successful identity challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintResponse {
    /// Stable agent fingerprint.
    pub fingerprint: String,
    /// Host name, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Agent version, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
}

/// Parameters for `GetContainerLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerLogsRequest {
    /// Container id or name.
    #[serde(rename = "containerID", alias = "containerId")]
    pub container_id: String,
}

/// Parameters for `GetContainerInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfoRequest {
    /// Container id or name.
    #[serde(rename = "containerID", alias = "containerId")]
    pub container_id: String,
}

/// Parameters for `StartContainer`, `StopContainer` and `RestartContainer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerControlRequest {
    /// Container id or name.
    #[serde(rename = "containerID", alias = "containerId")]
    pub container_id: String,
    /// Grace period before the runtime kills the container (0 = default).
    #[serde(default, rename = "timeoutSeconds")]
    pub timeout_seconds: u32,
}

impl ContainerControlRequest {
    /// Timeout to hand to the runtime, substituting the default for 0.
    pub fn effective_timeout(&self) -> u32 {
        if self.timeout_seconds == 0 {
            DEFAULT_STOP_TIMEOUT_SECS
        } else {
            self.timeout_seconds
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_codes_are_stable() {
        assert_eq!(Action::GetData.code(), 0);
        assert_eq!(Action::CheckFingerprint.code(), 1);
        assert_eq!(Action::GetSmartData.code(), 4);
        assert_eq!(Action::RestartContainer.code(), 7);
        for action in Action::ALL {
            assert_eq!(Action::from_code(action.code()), Some(action));
        }
        assert_eq!(Action::from_code(9999), None);
    }

    #[test]
    fn test_only_fingerprint_is_exempt() {
        let exempt: Vec<Action> = Action::ALL
            .into_iter()
            .filter(|a| !a.requires_verification())
            .collect();
        assert_eq!(exempt, vec![Action::CheckFingerprint]);
    }

    #[test]
    fn test_request_without_id_or_data() {
        let req: HubRequest = serde_json::from_str(r#"{"action":4}"#).unwrap();
        assert_eq!(req.id, None);
        assert_eq!(req.action, 4);
        assert!(req.data.is_null());
    }

    #[test]
    fn test_response_skips_empty_fields() {
        let json = serde_json::to_string(&AgentResponse::success(Some(3), json!("ok"))).unwrap();
        assert_eq!(json, r#"{"id":3,"result":"ok"}"#);

        let json = serde_json::to_string(&AgentResponse::error(None, "boom")).unwrap();
        assert_eq!(json, r#"{"error":"boom"}"#);
    }

    #[test]
    fn test_container_request_field_names() {
        let req: ContainerControlRequest =
            serde_json::from_value(json!({"containerID": "abc", "timeoutSeconds": 30})).unwrap();
        assert_eq!(req.container_id, "abc");
        assert_eq!(req.effective_timeout(), 30);

        let req: ContainerControlRequest =
            serde_json::from_value(json!({"containerId": "abc"})).unwrap();
        assert_eq!(req.effective_timeout(), DEFAULT_STOP_TIMEOUT_SECS);
    }

    #[test]
    fn test_data_options_camel_case() {
        let opts: DataRequestOptions = serde_json::from_value(json!({"cacheTimeMs": 5000})).unwrap();
        assert_eq!(opts.cache_time_ms, 5000);
    }
}
