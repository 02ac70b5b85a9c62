//! Action-code routing and the verification gate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::context::HandlerContext;
use crate::error::{AgentError, Result};
use crate::protocol::Action;

/// A unit of work bound to one action code.
///
/// A handler either delivers exactly one response through
/// [`HandlerContext::respond`] and returns `Ok`, or returns an error.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Process the request carried by `ctx`.
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<()>;
}

/// Maps action codes to handlers.
///
/// Built once at startup and then shared read-only between connections, so
/// the dispatch path takes `&self` and needs no lock.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Action, Arc<dyn RequestHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in handler for every action.
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        crate::handlers::register_defaults(&mut registry);
        registry
    }

    /// Bind `handler` to `action`, replacing any existing binding.
    pub fn register<H>(&mut self, action: Action, handler: H)
    where
        H: RequestHandler + 'static,
    {
        if self.handlers.insert(action, Arc::new(handler)).is_some() {
            warn!(action = %action, "replacing registered handler");
        }
    }

    /// Handler bound to `action`, if any.
    pub fn lookup(&self, action: Action) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.get(&action).cloned()
    }

    /// Number of bound actions.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if no handler is bound.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route the request in `ctx` to its handler.
    ///
    /// # Errors
    ///
    /// - [`AgentError::UnknownAction`] if no handler is bound to the code.
    /// - [`AgentError::Unverified`] if the action needs a verified hub and the
    ///   connection is not verified. The handler is not invoked.
    /// - Any error returned by the handler before it delivered a response.
    ///   An error after delivery is logged and dropped, so the request still
    ///   has a single outcome.
    /// - [`AgentError::NoResponse`] if the handler returned `Ok` without
    ///   delivering a response.
    pub async fn dispatch(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let code = ctx.request().action;
        let Some((action, handler)) = Action::from_code(code)
            .and_then(|action| self.handlers.get(&action).map(|h| (action, h)))
        else {
            warn!(action = code, request_id = ?ctx.request_id(), "unknown action");
            return Err(AgentError::UnknownAction(code));
        };

        if action.requires_verification() && !ctx.hub_verified() {
            warn!(action = %action, request_id = ?ctx.request_id(), "rejecting request from unverified hub");
            return Err(AgentError::Unverified);
        }

        debug!(action = %action, request_id = ?ctx.request_id(), "executing handler");
        if let Err(e) = handler.handle(ctx).await {
            if ctx.has_responded() {
                warn!(action = %action, request_id = ?ctx.request_id(), error = %e, "handler failed after responding");
                return Ok(());
            }
            return Err(e);
        }

        if !ctx.has_responded() {
            return Err(AgentError::NoResponse(action));
        }
        Ok(())
    }
}
