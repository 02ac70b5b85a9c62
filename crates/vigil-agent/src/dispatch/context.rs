//! Per-request dispatch context and the response capability.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::request::RequestEnvelope;
use crate::agent::Agent;
use crate::error::{AgentError, Result};

/// Delivers a handler's result back to the hub.
///
/// Each transport provides one implementation, built once per connection. The
/// handlers never learn which transport they are answering on.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Deliver `payload` as the answer to `request_id`.
    async fn deliver(&self, payload: Value, request_id: Option<u32>) -> Result<()>;
}

/// Connection-level session that owns the identity challenge.
///
/// Only the session may move the connection's verification flag from false to
/// true. It answers the challenge through [`HandlerContext::respond`].
#[async_trait]
pub trait Session: Send + Sync {
    /// Process an identity challenge carried by `ctx`.
    async fn handle_identity_challenge(&self, ctx: &HandlerContext<'_>) -> Result<()>;
}

/// Everything a handler needs to process one request.
///
/// Created fresh for each inbound request and dropped when the handler
/// returns. It borrows the shared agent state; many contexts may be live at
/// once on different tasks.
pub struct HandlerContext<'a> {
    responder: &'a dyn Responder,
    session: &'a dyn Session,
    agent: &'a Agent,
    request: &'a RequestEnvelope,
    request_id: Option<u32>,
    hub_verified: bool,
    responded: AtomicBool,
}

impl<'a> HandlerContext<'a> {
    /// Build a context.
    ///
    /// `hub_verified` is a snapshot of the connection's verification flag taken
    /// when the request arrived.
    pub fn new(
        responder: &'a dyn Responder,
        session: &'a dyn Session,
        agent: &'a Agent,
        request: &'a RequestEnvelope,
        request_id: Option<u32>,
        hub_verified: bool,
    ) -> Self {
        Self {
            responder,
            session,
            agent,
            request,
            request_id,
            hub_verified,
            responded: AtomicBool::new(false),
        }
    }

    /// Shared agent state.
    pub fn agent(&self) -> &'a Agent {
        self.agent
    }

    /// Connection session.
    pub fn session(&self) -> &'a dyn Session {
        self.session
    }

    /// The request being processed.
    pub fn request(&self) -> &'a RequestEnvelope {
        self.request
    }

    /// Correlation id to echo back.
    pub fn request_id(&self) -> Option<u32> {
        self.request_id
    }

    /// Whether the hub had passed the identity challenge.
    pub fn hub_verified(&self) -> bool {
        self.hub_verified
    }

    /// Whether a response has been delivered through this context.
    pub fn has_responded(&self) -> bool {
        self.responded.load(Ordering::SeqCst)
    }

    /// Serialize `payload` and deliver it with this request's id.
    ///
    /// A context delivers at most once. A second call fails with
    /// [`AgentError::AlreadyResponded`] and sends nothing.
    pub async fn respond<T>(&self, payload: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(payload)?;
        if self.responded.swap(true, Ordering::SeqCst) {
            return Err(AgentError::AlreadyResponded);
        }
        self.responder.deliver(value, self.request_id).await
    }
}
