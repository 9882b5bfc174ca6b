//! Messaging Network Gateway Module
//!
//! Manages one persistent session to the messaging network:
//! - Credential persistence across restarts (SQLite)
//! - QR pairing with time-boxed tokens
//! - Invalidation-aware automatic reconnection
//! - Outbound dispatch with degrade-to-text fallback
//!
//! The wire protocol itself lives behind the [`traits::SessionFactory`]
//! boundary and is supplied by the embedding service.

pub mod auth;
pub mod dispatch;
pub mod manager;
pub mod mock;
pub mod qr;
pub mod traits;

pub use auth::{CredentialStore, StoreError};
pub use dispatch::{MediaItem, SendReceipt, SendRequest};
pub use manager::{ConnectedIdentity, ConnectionManager, ConnectionState, Status};
pub use mock::{MockSession, MockSessionFactory};
pub use qr::{PairingCode, QrIssuer};
pub use traits::{
    AuthBlob, ConnectionUpdate, DisconnectCause, Jid, MessageId, OutboundPayload, SessionEvent,
    SessionFactory, Transition, WaError, WaResult, WaSession,
};
