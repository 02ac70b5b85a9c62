//! Transports that carry hub requests to the dispatch core.
//!
//! Both transports speak newline-delimited JSON frames and share the
//! [`Dispatcher`]; they differ only in how a connection is verified and how a
//! response reaches the hub.
//!
//! - [`socket`]: persistent Unix socket connections. Each connection starts
//!   unverified and must pass the identity challenge.
//! - [`shell`]: one remote-shell command channel, already authenticated by
//!   the shell server, answering inline on the channel's output.

pub mod shell;
pub mod socket;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::dispatch::{HandlerContext, HandlerRegistry, RequestEnvelope, Responder};
use crate::protocol::{AgentResponse, HubRequest, MAX_FRAME_SIZE};
use crate::session::{HubSession, TokenAuthenticator};

/// Shared state every connection dispatches against.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    agent: Arc<Agent>,
    auth: Arc<TokenAuthenticator>,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        registry: Arc<HandlerRegistry>,
        agent: Arc<Agent>,
        auth: Arc<TokenAuthenticator>,
    ) -> Self {
        Self {
            registry,
            agent,
            auth,
        }
    }

    /// Authenticator used for new sessions.
    pub fn auth(&self) -> &Arc<TokenAuthenticator> {
        &self.auth
    }

    /// Dispatch one decoded frame.
    ///
    /// Successful handlers answer through `responder`. A failed dispatch is
    /// turned into an error frame for the transport to send.
    pub async fn handle_frame(
        &self,
        session: &HubSession,
        responder: &dyn Responder,
        frame: HubRequest,
    ) -> Option<AgentResponse> {
        let id = frame.id;
        let envelope = match RequestEnvelope::from_frame(frame) {
            Ok((_, envelope)) => envelope,
            Err(e) => return Some(AgentResponse::error(id, e.to_string())),
        };

        let ctx = HandlerContext::new(
            responder,
            session,
            &self.agent,
            &envelope,
            id,
            session.is_verified(),
        );
        match self.registry.dispatch(&ctx).await {
            Ok(()) => None,
            Err(e) => {
                debug!(action = envelope.action, request_id = ?id, error = %e, "request failed");
                Some(AgentResponse::error(id, e.to_string()))
            }
        }
    }
}

/// Reads newline-delimited frames with a bounded buffer.
///
/// A bad line never ends the stream: lines that are too long, not UTF-8, or
/// not a request come back as an uncorrelated error frame and reading carries
/// on with the next line.
pub(crate) struct FrameReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next non-empty line, or `None` at end of input.
    pub(crate) async fn next_frame(
        &mut self,
    ) -> std::io::Result<Option<Result<HubRequest, AgentResponse>>> {
        loop {
            if !self.read_line().await? {
                return Ok(None);
            }

            let line = self.buf.strip_suffix(b"\n").unwrap_or(&self.buf[..]);
            if line.len() > MAX_FRAME_SIZE {
                let response = AgentResponse::error(
                    None,
                    format!("request too large: exceeds {MAX_FRAME_SIZE} byte limit"),
                );
                self.skip_rest_of_line().await?;
                return Ok(Some(Err(response)));
            }

            let text = match std::str::from_utf8(line) {
                Ok(text) => text.trim(),
                Err(e) => {
                    warn!(error = %e, "request is not valid UTF-8");
                    return Ok(Some(Err(AgentResponse::error(
                        None,
                        format!("parse error: {e}"),
                    ))));
                }
            };
            if text.is_empty() {
                continue;
            }
            return Ok(Some(parse_frame(text)));
        }
    }

    /// Read up to one byte past the frame limit. Returns false at end of input.
    async fn read_line(&mut self) -> std::io::Result<bool> {
        self.buf.clear();
        let n = (&mut self.reader)
            .take(MAX_FRAME_SIZE as u64 + 1)
            .read_until(b'\n', &mut self.buf)
            .await?;
        Ok(n > 0)
    }

    async fn skip_rest_of_line(&mut self) -> std::io::Result<()> {
        if self.buf.ends_with(b"\n") {
            return Ok(());
        }
        while self.read_line().await? {
            if self.buf.ends_with(b"\n") {
                break;
            }
        }
        self.buf.clear();
        Ok(())
    }
}

/// Parse one trimmed line into a request frame.
///
/// Failures become an uncorrelated error frame.
pub(crate) fn parse_frame(line: &str) -> Result<HubRequest, AgentResponse> {
    if line.len() > MAX_FRAME_SIZE {
        return Err(AgentResponse::error(
            None,
            format!(
                "request too large: {} bytes exceeds {MAX_FRAME_SIZE} byte limit",
                line.len()
            ),
        ));
    }
    serde_json::from_str(line).map_err(|e| {
        warn!(error = %e, "failed to parse request");
        AgentResponse::error(None, format!("parse error: {e}"))
    })
}

/// Write a response as a single JSON line and flush.
pub(crate) async fn write_frame<W>(writer: &mut W, response: &AgentResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await
}
