//! Application hooks
//!
//! Implement `RtmpHandler` to authorize connects, publishes and plays or
//! to observe session lifecycle. Every method has an accepting default.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::live::registry::StreamKey;
use crate::protocol::message::{ConnectParams, DEFAULT_VHOST};

/// Outcome of an authorization hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Accept,
    Reject(String),
}

impl AuthResult {
    pub fn is_accept(&self) -> bool {
        matches!(self, AuthResult::Accept)
    }
}

/// Read-only session information handed to every hook
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: u64,
    pub peer_addr: SocketAddr,
    /// Set once `connect` has been accepted
    pub connect_params: Option<Arc<ConnectParams>>,
}

impl SessionContext {
    pub fn new(session_id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            session_id,
            peer_addr,
            connect_params: None,
        }
    }

    pub fn app(&self) -> &str {
        self.connect_params
            .as_ref()
            .map(|p| p.app.as_str())
            .unwrap_or_default()
    }

    pub fn vhost(&self) -> String {
        self.connect_params
            .as_ref()
            .map(|p| p.vhost())
            .unwrap_or_else(|| DEFAULT_VHOST.to_string())
    }

    pub fn tc_url(&self) -> Option<&str> {
        self.connect_params
            .as_ref()
            .and_then(|p| p.tc_url.as_deref())
    }

    /// Key for a stream name within this session's vhost and app
    pub fn stream_key(&self, stream_name: &str) -> StreamKey {
        StreamKey::new(self.vhost(), self.app(), stream_name)
    }
}

#[async_trait]
pub trait RtmpHandler: Send + Sync + 'static {
    /// Called when a TCP connection is accepted, before the handshake.
    ///
    /// Return false to close it immediately.
    async fn on_connection(&self, _ctx: &SessionContext) -> bool {
        true
    }

    async fn on_connect(&self, _ctx: &SessionContext, _params: &ConnectParams) -> AuthResult {
        AuthResult::Accept
    }

    async fn on_publish(&self, _ctx: &SessionContext, _key: &StreamKey) -> AuthResult {
        AuthResult::Accept
    }

    async fn on_play(&self, _ctx: &SessionContext, _key: &StreamKey) -> AuthResult {
        AuthResult::Accept
    }

    async fn on_publish_stop(&self, _ctx: &SessionContext, _key: &StreamKey) {}

    async fn on_play_stop(&self, _ctx: &SessionContext, _key: &StreamKey) {}

    async fn on_disconnect(&self, _ctx: &SessionContext) {}
}

/// Accepts everything and logs lifecycle events
pub struct LoggingHandler;

#[async_trait]
impl RtmpHandler for LoggingHandler {
    async fn on_connect(&self, ctx: &SessionContext, params: &ConnectParams) -> AuthResult {
        tracing::info!(
            session_id = ctx.session_id,
            peer = %ctx.peer_addr,
            app = %params.app,
            vhost = %params.vhost(),
            "Connect request"
        );
        AuthResult::Accept
    }

    async fn on_publish(&self, ctx: &SessionContext, key: &StreamKey) -> AuthResult {
        tracing::info!(session_id = ctx.session_id, stream = %key, "Publish request");
        AuthResult::Accept
    }

    async fn on_play(&self, ctx: &SessionContext, key: &StreamKey) -> AuthResult {
        tracing::info!(session_id = ctx.session_id, stream = %key, "Play request");
        AuthResult::Accept
    }

    async fn on_disconnect(&self, ctx: &SessionContext) {
        tracing::info!(session_id = ctx.session_id, "Connection closed");
    }
}
