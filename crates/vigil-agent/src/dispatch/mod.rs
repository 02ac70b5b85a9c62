//! Request dispatch for hub requests.
//!
//! Transports decode an inbound frame into a [`RequestEnvelope`], wrap it in a
//! [`HandlerContext`] together with the connection's verification state and a
//! transport-specific [`Responder`], and hand it to the [`HandlerRegistry`].
//!
//! ```text
//! transport ──▶ RequestEnvelope ──▶ HandlerContext ──▶ HandlerRegistry::dispatch
//!                                         │                   │
//!                                         │          verification gate
//!                                         │                   ▼
//!                                         │            RequestHandler
//!                                         ▼                   │
//!                                     Responder ◀── respond() ┘
//! ```
//!
//! Every dispatched request ends in exactly one terminal outcome: either the
//! handler delivered one response through the context, or `dispatch` returned
//! an error for the transport to report.

mod context;
mod registry;
mod request;

pub use context::{HandlerContext, Responder, Session};
pub use registry::{HandlerRegistry, RequestHandler};
pub use request::RequestEnvelope;
