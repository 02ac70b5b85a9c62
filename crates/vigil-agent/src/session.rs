//! Hub sessions and the identity challenge.
//!
//! Every connection owns a [`VerificationFlag`]. It starts false and flips to
//! true once the hub presents the shared token in a `CheckFingerprint`
//! request. Nothing else in the agent can set it.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::dispatch::{HandlerContext, Session};
use crate::error::{AgentError, Result};
use crate::protocol::{FingerprintRequest, FingerprintResponse};

/// Per-connection verification state.
///
/// Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct VerificationFlag(Arc<AtomicBool>);

impl VerificationFlag {
    /// A flag for a fresh, unverified connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag for a channel whose peer was authenticated by the channel itself.
    pub fn preverified() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Current state.
    pub fn is_verified(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn mark_verified(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Checks hub tokens and knows how to identify this agent.
#[derive(Debug)]
pub struct TokenAuthenticator {
    hub_token: String,
    fingerprint: String,
}

impl TokenAuthenticator {
    /// Create an authenticator for `hub_token` answering with `fingerprint`.
    pub fn new(hub_token: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            hub_token: hub_token.into(),
            fingerprint: fingerprint.into(),
        }
    }

    /// The agent fingerprint sent to a verified hub.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Compare `presented` with the configured token in constant time.
    pub fn check(&self, presented: &str) -> bool {
        let expected = self.hub_token.as_bytes();
        let presented = presented.as_bytes();
        if expected.is_empty() || expected.len() != presented.len() {
            return false;
        }
        expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Session state of one hub connection.
#[derive(Debug, Clone)]
pub struct HubSession {
    flag: VerificationFlag,
    auth: Arc<TokenAuthenticator>,
}

impl HubSession {
    /// Create a session around a connection's flag.
    pub fn new(flag: VerificationFlag, auth: Arc<TokenAuthenticator>) -> Self {
        Self { flag, auth }
    }

    /// The connection's verification flag.
    pub fn flag(&self) -> &VerificationFlag {
        &self.flag
    }

    /// Whether the hub has been verified on this connection.
    pub fn is_verified(&self) -> bool {
        self.flag.is_verified()
    }
}

#[async_trait]
impl Session for HubSession {
    async fn handle_identity_challenge(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let request: FingerprintRequest = ctx.request().decode_or_default();
        if !self.auth.check(&request.token) {
            warn!(request_id = ?ctx.request_id(), "hub presented an invalid token");
            return Err(AgentError::Auth("invalid hub token".into()));
        }

        if !self.flag.is_verified() {
            info!("hub verified");
        }
        self.flag.mark_verified();

        let response = FingerprintResponse {
            fingerprint: self.auth.fingerprint().to_string(),
            hostname: request.need_sys_info.then(crate::stats::hostname),
            agent_version: request
                .need_sys_info
                .then(|| env!("CARGO_PKG_VERSION").to_string()),
        };
        ctx.respond(&response).await
    }
}

/// Resolve the agent fingerprint.
///
/// Uses the configured value, else the machine id, else the host name.
pub fn resolve_fingerprint(configured: Option<&str>) -> String {
    configured
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .or_else(|| {
            fs::read_to_string("/etc/machine-id")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(crate::stats::hostname)
}
