//! Container runtime access.
//!
//! Handlers talk to the runtime through [`ContainerRuntime`]. The bundled
//! [`DockerClient`] sends Docker Engine API requests over the daemon's Unix
//! socket.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hyper::{Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use thiserror::Error;
use tokio::time::timeout;

/// Default Docker daemon socket.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Timeout for a single Docker API call, on top of any stop grace period.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of log lines fetched per request.
const LOG_TAIL_LINES: u32 = 200;

/// Maximum accepted container id length.
const MAX_CONTAINER_ID_LEN: usize = 128;

/// Errors from the container runtime.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The id contains characters that cannot name a container.
    #[error("invalid container id: {0:?}")]
    InvalidId(String),

    /// The runtime does not know the container.
    #[error("container not found: {0}")]
    NotFound(String),

    /// The runtime answered with an error status.
    #[error("docker API returned {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message from the daemon
        message: String,
    },

    /// The request could not be sent or read.
    #[error("docker request failed: {0}")]
    Request(String),

    /// The daemon did not answer in time.
    #[error("docker request timed out after {0:?}")]
    Timeout(Duration),
}

/// Operations the agent performs on containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Recent stdout/stderr output of a container.
    async fn logs(&self, id: &str) -> Result<String, ContainerError>;

    /// Raw inspect document of a container.
    async fn info(&self, id: &str) -> Result<Vec<u8>, ContainerError>;

    /// Start a container.
    async fn start(&self, id: &str) -> Result<(), ContainerError>;

    /// Stop a container, waiting `timeout_secs` before killing it.
    async fn stop(&self, id: &str, timeout_secs: u32) -> Result<(), ContainerError>;

    /// Restart a container, waiting `timeout_secs` before killing it.
    async fn restart(&self, id: &str, timeout_secs: u32) -> Result<(), ContainerError>;
}

/// Reject ids that could escape the `/containers/{id}` path segment.
pub fn validate_container_id(id: &str) -> Result<(), ContainerError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_CONTAINER_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ContainerError::InvalidId(id.to_string()))
    }
}

/// Docker Engine API client over a Unix socket.
pub struct DockerClient {
    socket_path: PathBuf,
    client: Client<UnixConnector, Body>,
}

impl DockerClient {
    /// Create a client for the daemon listening on `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            client: Client::unix(),
        }
    }

    /// Path of the daemon socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<(), ContainerError> {
        self.send(Method::GET, "/_ping", REQUEST_TIMEOUT).await?;
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        limit: Duration,
    ) -> Result<(StatusCode, hyper::body::Bytes), ContainerError> {
        let start = Instant::now();
        tracing::trace!(method = %method, path = %path, "docker request");

        let uri: hyper::Uri = Uri::new(&self.socket_path, path).into();
        let request = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header("Host", "docker")
            .body(Body::empty())
            .map_err(|e| ContainerError::Request(format!("failed to build request: {e}")))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| ContainerError::Request(e.to_string()))?;
            let status = response.status();
            let body = hyper::body::to_bytes(response.into_body())
                .await
                .map_err(|e| ContainerError::Request(format!("failed to read body: {e}")))?;
            Ok::<_, ContainerError>((status, body))
        };

        let (status, body) = timeout(limit, exchange).await.map_err(|_| {
            tracing::warn!(method = %method, path = %path, "docker request timed out");
            ContainerError::Timeout(limit)
        })??;

        tracing::debug!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "docker response"
        );
        Ok((status, body))
    }

    async fn call(
        &self,
        method: Method,
        id: &str,
        path: &str,
        limit: Duration,
    ) -> Result<hyper::body::Bytes, ContainerError> {
        validate_container_id(id)?;
        let (status, body) = self.send(method, path, limit).await?;
        match status {
            s if s.is_success() || s == StatusCode::NOT_MODIFIED => Ok(body),
            StatusCode::NOT_FOUND => Err(ContainerError::NotFound(id.to_string())),
            s => Err(ContainerError::Api {
                status: s.as_u16(),
                message: api_error_message(&body),
            }),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn logs(&self, id: &str) -> Result<String, ContainerError> {
        let path = format!("/containers/{id}/logs?stdout=1&stderr=1&tail={LOG_TAIL_LINES}");
        let body = self.call(Method::GET, id, &path, REQUEST_TIMEOUT).await?;
        Ok(demux_log_stream(&body))
    }

    async fn info(&self, id: &str) -> Result<Vec<u8>, ContainerError> {
        let path = format!("/containers/{id}/json");
        let body = self.call(Method::GET, id, &path, REQUEST_TIMEOUT).await?;
        Ok(body.to_vec())
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        tracing::info!(container = %id, "starting container");
        let path = format!("/containers/{id}/start");
        self.call(Method::POST, id, &path, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    async fn stop(&self, id: &str, timeout_secs: u32) -> Result<(), ContainerError> {
        tracing::info!(container = %id, timeout_secs, "stopping container");
        let path = format!("/containers/{id}/stop?t={timeout_secs}");
        let limit = REQUEST_TIMEOUT + Duration::from_secs(timeout_secs.into());
        self.call(Method::POST, id, &path, limit).await?;
        Ok(())
    }

    async fn restart(&self, id: &str, timeout_secs: u32) -> Result<(), ContainerError> {
        tracing::info!(container = %id, timeout_secs, "restarting container");
        let path = format!("/containers/{id}/restart?t={timeout_secs}");
        let limit = REQUEST_TIMEOUT + Duration::from_secs(timeout_secs.into());
        self.call(Method::POST, id, &path, limit).await?;
        Ok(())
    }
}

/// Extract the `message` field of a Docker error body.
fn api_error_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

/// Convert a Docker log body into text.
///
/// Containers without a TTY return a multiplexed stream of frames, each with
/// an 8-byte header `[stream, 0, 0, 0, len(u32 BE)]`. TTY containers return
/// the raw output, which is passed through.
pub fn demux_log_stream(body: &[u8]) -> String {
    if !is_multiplexed(body) {
        return String::from_utf8_lossy(body).into_owned();
    }

    let mut out = Vec::with_capacity(body.len());
    let mut rest = body;
    while rest.len() >= 8 {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (8 + len).min(rest.len());
        out.extend_from_slice(&rest[8..end]);
        rest = &rest[end..];
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_multiplexed(body: &[u8]) -> bool {
    body.len() >= 8 && body[0] <= 2 && body[1..4] == [0, 0, 0]
}
