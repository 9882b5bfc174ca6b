//! Protocol Session Trait Abstractions
//!
//! The wire protocol (handshake, encryption, framing) is supplied by an
//! external library. These traits are the narrow boundary the connection
//! manager depends on, which also enables full coverage via MockSession.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Network address of a chat destination (individual contact or group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Jid(pub String);

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound message payload handed to the live session.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    Text {
        body: String,
    },
    Image {
        data: Vec<u8>,
        mime_type: String,
        caption: Option<String>,
    },
}

/// Opaque credential blob persisted across restarts.
///
/// The protocol library owns the shape of this data; we only merge and
/// store it. Top-level fields are the unit of incremental update.
pub type AuthBlob = serde_json::Map<String, serde_json::Value>;

/// Why the session closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Remote party revoked the session. Credentials are dead and must be
    /// cleared before the next pairing attempt.
    LoggedOut,
    /// Any other cause (network drop, server restart). Credentials stay
    /// valid and reconnection resumes the session.
    Transient(String),
}

impl DisconnectCause {
    pub fn is_invalidation(&self) -> bool {
        matches!(self, DisconnectCause::LoggedOut)
    }
}

/// State change reported by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Open,
    Close(DisconnectCause),
}

/// Connection update multiplexing pairing token and open/close signals,
/// mirroring the protocol library's `connection-update` event shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionUpdate {
    pub transition: Option<Transition>,
    pub pairing_token: Option<String>,
}

/// Typed event stream emitted by a live session.
///
/// Events for one session arrive in emission order on its channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Incremental credential update to merge into the persisted blob.
    CredsUpdate(AuthBlob),
    Connection(ConnectionUpdate),
}

/// Result type for gateway operations
pub type WaResult<T> = Result<T, WaError>;

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum WaError {
    #[error("not connected to the messaging network")]
    NotConnected,

    #[error("invalid destination")]
    InvalidDestination,

    #[error("message text or images are required")]
    EmptyMessage,

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("store error: {0}")]
    Store(#[from] super::auth::StoreError),

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Live authenticated session handle.
///
/// Valid only while the connection is open; the manager discards it on
/// close and opens a replacement, never mutates it.
#[async_trait]
pub trait WaSession: Send + Sync {
    /// Send one payload, returning the server-assigned message id.
    async fn send(&self, destination: &Jid, payload: OutboundPayload) -> WaResult<MessageId>;

    /// Protocol-level logout, invalidating the credentials server-side.
    async fn logout(&self) -> WaResult<()>;

    /// Graceful termination of the underlying socket.
    async fn end(&self) -> WaResult<()>;

    /// Address of the authenticated account, populated once the session
    /// is open. `None` before that, or when the library omits it.
    fn self_identity(&self) -> Option<String>;
}

/// Opens protocol sessions seeded with persisted credentials.
///
/// The factory receives the sender half of a per-session event channel;
/// all credential and connection updates for that session flow through it.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: WaSession + Send + Sync + 'static;

    async fn open(
        &self,
        auth: AuthBlob,
        events: mpsc::Sender<SessionEvent>,
    ) -> WaResult<Arc<Self::Session>>;
}
