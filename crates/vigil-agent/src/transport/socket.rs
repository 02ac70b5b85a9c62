//! Unix socket transport.
//!
//! Every accepted connection gets its own [`HubSession`] with a fresh,
//! unverified flag. Requests on a connection are dispatched concurrently, so
//! responses are written in completion order and carry the request id for
//! correlation.

use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{write_frame, Dispatcher, FrameReader};
use crate::dispatch::Responder;
use crate::error::{AgentError, Result};
use crate::protocol::AgentResponse;
use crate::session::{HubSession, VerificationFlag};

/// Responses queued per connection before handlers wait on the writer.
const RESPONSE_QUEUE: usize = 64;

/// Responder that queues frames for the connection's writer task.
#[derive(Debug, Clone)]
pub struct FramedResponder {
    tx: mpsc::Sender<AgentResponse>,
}

impl FramedResponder {
    /// Create a responder feeding `tx`.
    pub fn new(tx: mpsc::Sender<AgentResponse>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Responder for FramedResponder {
    async fn deliver(&self, payload: Value, request_id: Option<u32>) -> Result<()> {
        self.tx
            .send(AgentResponse::success(request_id, payload))
            .await
            .map_err(|_| AgentError::Transport("connection closed".into()))
    }
}

/// Bind the hub-facing socket, replacing a stale socket file.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

/// Accept connections until `shutdown` completes.
pub async fn serve<F>(listener: UnixListener, dispatcher: Dispatcher, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                info!("hub connected");
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, dispatcher).await {
                        warn!(error = %e, "connection ended with error");
                    }
                    info!("hub disconnected");
                });
            }
            () = &mut shutdown => {
                info!("shutting down listener");
                return Ok(());
            }
        }
    }
}

/// Serve one hub connection until it closes.
///
/// Returns once the peer has closed its side and every in-flight request has
/// been answered.
pub async fn handle_connection<S>(stream: S, dispatcher: Dispatcher) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(RESPONSE_QUEUE);
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let session = HubSession::new(VerificationFlag::new(), Arc::clone(dispatcher.auth()));
    let responder = FramedResponder::new(tx.clone());
    let mut frames = FrameReader::new(reader);

    let read_result = loop {
        let frame = match frames.next_frame().await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(response))) => {
                if tx.send(response).await.is_err() {
                    break Ok(());
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
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = dispatcher.handle_frame(&session, &responder, frame).await {
                let _ = tx.send(response).await;
            }
        });
    };

    // The writer drains until the last in-flight request drops its sender.
    drop(responder);
    drop(tx);
    let write_result = writer_task
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    read_result.and(write_result)
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<AgentResponse>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        write_frame(&mut writer, &response).await?;
    }
    Ok(())
}
