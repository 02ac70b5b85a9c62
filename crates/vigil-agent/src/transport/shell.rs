//! Remote-shell command channel.
//!
//! The hub reaches the agent through a shell session it has already
//! authenticated, so the channel starts verified. Responses are written inline
//! on the channel output as each handler finishes.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{write_frame, Dispatcher, FrameReader};
use crate::dispatch::Responder;
use crate::error::{AgentError, Result};
use crate::protocol::AgentResponse;
use crate::session::{HubSession, VerificationFlag};

/// Responder that writes frames straight to the channel output.
pub struct InlineResponder<W> {
    writer: Arc<Mutex<W>>,
}

impl<W> InlineResponder<W> {
    /// Create a responder over a shared writer.
    pub fn new(writer: Arc<Mutex<W>>) -> Self {
        Self { writer }
    }
}

impl<W> Clone for InlineResponder<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> InlineResponder<W> {
    async fn send(&self, response: &AgentResponse) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, response).await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Responder for InlineResponder<W> {
    async fn deliver(&self, payload: Value, request_id: Option<u32>) -> Result<()> {
        self.send(&AgentResponse::success(request_id, payload))
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))
    }
}

/// Serve requests read from `reader` until end of input or a read error.
///
/// Waits for every in-flight request before returning, on both paths.
pub async fn serve_channel<R, W>(reader: R, writer: W, dispatcher: Dispatcher) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let responder = InlineResponder::new(Arc::new(Mutex::new(writer)));
    let session = HubSession::new(VerificationFlag::preverified(), Arc::clone(dispatcher.auth()));
    let mut frames = FrameReader::new(reader);
    let mut in_flight = JoinSet::new();

    info!("shell channel open");
    let read_result = loop {
        let frame = match frames.next_frame().await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(response))) => {
                if let Err(e) = responder.send(&response).await {
                    break Err(e);
                }
                continue;
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        debug!(action = frame.action, request_id = ?frame.id, "request received");
        let dispatcher = dispatcher.clone();
        let session = session.clone();
        let responder = responder.clone();
        in_flight.spawn(async move {
            if let Some(response) = dispatcher.handle_frame(&session, &responder, frame).await {
                if let Err(e) = responder.send(&response).await {
                    warn!(error = %e, "failed to write error response");
                }
            }
        });
    };

    if let Err(e) = &read_result {
        warn!(error = %e, "shell channel read failed, finishing in-flight requests");
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "request task failed");
        }
    }
    info!("shell channel closed");

    let mut writer = responder.writer.lock().await;
    let shutdown_result = writer.shutdown().await;
    read_result.and(shutdown_result)
}
