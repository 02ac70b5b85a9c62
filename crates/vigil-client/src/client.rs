//! Client side of the agent socket protocol.
//!
//! Requests are numbered per connection and answered by id. The agent may
//! interleave responses, so reads skip frames for other ids.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tokio::time::timeout;
use vigil_agent::protocol::{
    Action, AgentResponse, ContainerControlRequest, ContainerInfoRequest, ContainerLogsRequest,
    DataRequestOptions, FingerprintRequest, FingerprintResponse, HubRequest,
};
use vigil_agent::{HealthRecord, SystemStats};

use crate::error::{ClientError, Result};

/// Timeout for a single request, covering slow container operations.
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for one agent connection.
pub struct HubClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: BufWriter<tokio::io::WriteHalf<UnixStream>>,
    next_id: u32,
}

impl HubClient {
    /// Connect to the agent socket at `path`.
    pub async fn connect(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Connecting to agent");
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| ClientError::Connection(format!("socket connect failed: {e}")))?;

        let (read_half, write_half) = tokio::io::split(stream);
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            next_id: 1,
        })
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be written, times out, the
    /// connection closes, or the agent answers with an error frame.
    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &mut self,
        action: Action,
        data: &P,
    ) -> Result<R> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let request = HubRequest {
            id: Some(id),
            action: action.code(),
            data: serde_json::to_value(data)?,
        };
        let line = serde_json::to_string(&request)?;
        tracing::debug!(action = %action, id, "Sending request");

        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let response = match timeout(CALL_TIMEOUT, self.read_response(id)).await {
            Ok(response) => response?,
            Err(_) => {
                tracing::warn!(action = %action, id, "Request timed out");
                return Err(ClientError::Timeout(CALL_TIMEOUT));
            }
        };

        if let Some(message) = response.error {
            tracing::debug!(action = %action, id, message = %message, "Agent returned error");
            return Err(ClientError::Agent(message));
        }
        let result = response.result.ok_or(ClientError::MissingResult(id))?;
        serde_json::from_value(result).map_err(ClientError::from)
    }

    async fn read_response(&mut self, id: u32) -> Result<AgentResponse> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(ClientError::Closed);
            }
            let response: AgentResponse = serde_json::from_str(line.trim())?;
            match response.id {
                Some(got) if got == id => return Ok(response),
                // Uncorrelated frames only report framing errors.
                None if response.is_error() => return Ok(response),
                other => tracing::trace!(expected = id, got = ?other, "Skipping response"),
            }
        }
    }

    /// Answer the identity challenge.
    pub async fn verify(&mut self, token: &str, need_sys_info: bool) -> Result<FingerprintResponse> {
        let request = FingerprintRequest {
            token: token.to_string(),
            need_sys_info,
        };
        self.call(Action::CheckFingerprint, &request).await
    }

    /// Fetch host statistics no older than `cache_time_ms`.
    pub async fn system_stats(&mut self, cache_time_ms: u64) -> Result<SystemStats> {
        self.call(Action::GetData, &DataRequestOptions { cache_time_ms })
            .await
    }

    /// Fetch recent container logs. Empty when the host has no container runtime.
    pub async fn container_logs(&mut self, container_id: &str) -> Result<String> {
        let request = ContainerLogsRequest {
            container_id: container_id.to_string(),
        };
        self.call(Action::GetContainerLogs, &request).await
    }

    /// Fetch the runtime's inspect document for a container.
    ///
    /// Returns `Value::Null` when the host has no container runtime.
    pub async fn container_info(&mut self, container_id: &str) -> Result<Value> {
        let request = ContainerInfoRequest {
            container_id: container_id.to_string(),
        };
        let text: String = self.call(Action::GetContainerInfo, &request).await?;
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Start a container.
    pub async fn start_container(&mut self, container_id: &str) -> Result<()> {
        self.control(Action::StartContainer, container_id, 0).await
    }

    /// Stop a container. A timeout of 0 uses the agent default.
    pub async fn stop_container(&mut self, container_id: &str, timeout_seconds: u32) -> Result<()> {
        self.control(Action::StopContainer, container_id, timeout_seconds)
            .await
    }

    /// Restart a container. A timeout of 0 uses the agent default.
    pub async fn restart_container(
        &mut self,
        container_id: &str,
        timeout_seconds: u32,
    ) -> Result<()> {
        self.control(Action::RestartContainer, container_id, timeout_seconds)
            .await
    }

    /// Fetch SMART health keyed by device.
    pub async fn disk_health(&mut self) -> Result<BTreeMap<String, HealthRecord>> {
        self.call(Action::GetSmartData, &Value::Null).await
    }

    async fn control(&mut self, action: Action, container_id: &str, timeout_seconds: u32) -> Result<()> {
        let request = ContainerControlRequest {
            container_id: container_id.to_string(),
            timeout_seconds,
        };
        let _ack: String = self.call(action, &request).await?;
        Ok(())
    }
}
