//! Connection Manager
//!
//! Single source of truth for connection state. Orchestrates session
//! creation, event wiring, and recovery:
//!
//! - persisted credentials seed every session open
//! - credential deltas from the session are persisted as they arrive
//! - pairing tokens go to the QR issuer while unpaired
//! - an invalidated close clears credentials before reconnecting; any
//!   other close reconnects with the saved ones
//! - every close schedules a reconnect after a fixed delay; there is no
//!   terminal state
//!
//! The manager is a cloneable context over shared internals, so multiple
//! handles (HTTP layer, event task, reconnect timers) observe one logical
//! connection.

use super::auth::CredentialStore;
use super::dispatch::{self, SendReceipt, SendRequest};
use super::qr::{PairingCode, QrIssuer};
use super::traits::*;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Fixed delay before a scheduled reconnect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle state. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Address of the authenticated account, present only while connected.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConnectedIdentity {
    /// Network address as reported by the session.
    pub address: String,
    /// Human-readable phone form, when the address carries digits.
    pub formatted: Option<String>,
}

/// Snapshot returned by [`ConnectionManager::status`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Status {
    pub connected: bool,
    pub state: ConnectionState,
    pub identity: Option<ConnectedIdentity>,
    pub has_valid_token: bool,
}

struct Shared<S> {
    state: ConnectionState,
    session: Option<Arc<S>>,
    identity: Option<ConnectedIdentity>,
    /// Bumped on every open/discard; events for a superseded generation
    /// are dropped so a discarded handle cannot mutate fresh state.
    generation: u64,
}

impl<S> Default for Shared<S> {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session: None,
            identity: None,
            generation: 0,
        }
    }
}

/// Owns the single session handle and drives the state machine.
pub struct ConnectionManager<F: SessionFactory> {
    factory: Arc<F>,
    store: Arc<CredentialStore>,
    qr: QrIssuer,
    shared: Arc<Mutex<Shared<F::Session>>>,
    /// Reentrancy guard: set while a connect (or scheduled reconnect) is
    /// in flight, cleared on open, on open failure, on disconnect and
    /// logout, and just before a delayed reconnect fires.
    reconnecting: Arc<AtomicBool>,
    reconnect_delay: Duration,
}

impl<F: SessionFactory> Clone for ConnectionManager<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            store: Arc::clone(&self.store),
            qr: self.qr.clone(),
            shared: Arc::clone(&self.shared),
            reconnecting: Arc::clone(&self.reconnecting),
            reconnect_delay: self.reconnect_delay,
        }
    }
}

impl<F: SessionFactory> ConnectionManager<F> {
    pub fn new(factory: F, store: CredentialStore) -> Self {
        Self {
            factory: Arc::new(factory),
            store: Arc::new(store),
            qr: QrIssuer::new(),
            shared: Arc::new(Mutex::new(Shared::default())),
            reconnecting: Arc::new(AtomicBool::new(false)),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.qr = QrIssuer::with_ttl(ttl);
        self
    }

    /// Open a session seeded with persisted credentials.
    ///
    /// No-op when a connect is already in flight. Returns once the
    /// session is created; the open/close signals arrive asynchronously
    /// through the event task.
    pub async fn connect(&self) -> WaResult<()> {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("connect already in flight; ignoring");
            return Ok(());
        }

        {
            let mut shared = self.shared.lock().unwrap();
            shared.state = ConnectionState::Connecting;
        }
        info!("opening session");

        let auth = match self.store.load_auth_state().await {
            Ok(auth) => auth,
            Err(e) => {
                self.abort_connect();
                return Err(e.into());
            }
        };

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let session = match self.factory.open(auth, event_tx).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session open failed");
                self.abort_connect();
                return Err(e);
            }
        };

        let (generation, superseded) = {
            let mut shared = self.shared.lock().unwrap();
            shared.generation += 1;
            let superseded = shared.session.replace(Arc::clone(&session));
            (shared.generation, superseded)
        };

        // A connect over a still-open session replaces it; end the old
        // handle so its socket does not linger.
        if let Some(old) = superseded {
            if let Err(e) = old.end().await {
                warn!(error = %e, "failed to end superseded session");
            }
        }

        tokio::spawn(self.clone().drive(event_rx, session, generation));
        Ok(())
    }

    fn abort_connect(&self) {
        self.reconnecting.store(false, Ordering::SeqCst);
        let mut shared = self.shared.lock().unwrap();
        shared.state = ConnectionState::Disconnected;
    }

    /// Consume one session's event stream until it closes.
    ///
    /// A channel that closes without a `Close` signal counts as a
    /// transient disconnect, so the state machine never wedges waiting
    /// for a signal that cannot arrive.
    async fn drive(self, mut events: mpsc::Receiver<SessionEvent>, session: Arc<F::Session>, generation: u64) {
        loop {
            let Some(event) = events.recv().await else {
                if self.shared.lock().unwrap().generation == generation {
                    warn!("session event channel closed without a close signal");
                    self.handle_close(DisconnectCause::Transient(
                        "event channel closed".to_string(),
                    ))
                    .await;
                }
                return;
            };
            if self.shared.lock().unwrap().generation != generation {
                debug!("dropping event for superseded session");
                return;
            }
            match event {
                SessionEvent::CredsUpdate(delta) => {
                    // A failed incremental save must not tear down the
                    // live session.
                    if let Err(e) = self.store.save_partial(&delta).await {
                        warn!(error = %e, "credential save failed; session stays up");
                    }
                }
                SessionEvent::Connection(update) => {
                    if let Some(token) = update.pairing_token {
                        info!("pairing token issued");
                        self.qr.set_token(&token);
                    }
                    match update.transition {
                        Some(Transition::Open) => self.handle_open(session.as_ref()),
                        Some(Transition::Close(cause)) => {
                            self.handle_close(cause).await;
                            return;
                        }
                        None => {}
                    }
                }
            }
        }
    }

    fn handle_open(&self, session: &F::Session) {
        let identity = session.self_identity().map(identity_from_address);
        {
            let mut shared = self.shared.lock().unwrap();
            shared.state = ConnectionState::Connected;
            shared.identity = identity.clone();
        }
        self.reconnecting.store(false, Ordering::SeqCst);
        self.qr.clear();

        match identity {
            Some(identity) => info!(address = %identity.address, "session open"),
            None => info!("session open (no self-identity reported)"),
        }
    }

    async fn handle_close(&self, cause: DisconnectCause) {
        {
            let mut shared = self.shared.lock().unwrap();
            shared.state = ConnectionState::Disconnected;
            shared.identity = None;
            shared.session = None;
        }

        if cause.is_invalidation() {
            warn!("session invalidated; clearing credentials before re-pairing");
            // Reconnect proceeds even on a failed clear; the worst case
            // is one failed resume attempt instead of a wedged machine.
            if let Err(e) = self.store.clear_auth_state().await {
                warn!(error = %e, "credential clear failed; reconnecting anyway");
            }
        } else {
            info!(cause = ?cause, "transient disconnect; reconnecting with saved credentials");
        }

        self.schedule_reconnect();
    }

    /// Reconnect after the fixed delay, clearing the reentrancy flag just
    /// before the call so the fresh connect is not rejected as duplicate.
    fn schedule_reconnect(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(manager.reconnect_delay).await;
            manager.reconnecting.store(false, Ordering::SeqCst);
            if let Err(e) = manager.connect().boxed().await {
                warn!(error = %e, "scheduled reconnect failed");
            }
        });
    }

    /// Gracefully terminate the session, if any. Idempotent.
    ///
    /// Also releases the reentrancy guard: the generation bump stops the
    /// event task before it can handle a close, so nothing else would.
    pub async fn disconnect(&self) -> WaResult<()> {
        let session = {
            let mut shared = self.shared.lock().unwrap();
            shared.state = ConnectionState::Disconnected;
            shared.identity = None;
            shared.generation += 1;
            shared.session.take()
        };
        self.reconnecting.store(false, Ordering::SeqCst);

        if let Some(session) = session {
            session.end().await?;
        }
        info!("disconnected");
        Ok(())
    }

    /// Invalidate the session and force a fresh pairing.
    ///
    /// The protocol-level logout is best-effort; the credential clear is
    /// not, since stale credentials would make the next connect resume a
    /// dead session. A reconnect is scheduled only after a successful
    /// clear.
    pub async fn logout(&self) -> WaResult<()> {
        info!("logout requested");
        let session = {
            let mut shared = self.shared.lock().unwrap();
            shared.state = ConnectionState::Disconnected;
            shared.identity = None;
            shared.generation += 1;
            shared.session.take()
        };
        // Released here rather than by the scheduled reconnect, so a
        // failed credential clear below cannot leave the guard stuck.
        self.reconnecting.store(false, Ordering::SeqCst);

        if let Some(session) = session {
            if let Err(e) = session.logout().await {
                warn!(error = %e, "protocol logout failed; clearing credentials regardless");
            }
        }
        self.qr.clear();

        self.store.clear_auth_state().await?;

        info!("logout complete; new pairing token will be issued");
        self.schedule_reconnect();
        Ok(())
    }

    /// Pure read of the current connection state. Never fails.
    pub fn status(&self) -> Status {
        let shared = self.shared.lock().unwrap();
        Status {
            connected: shared.state == ConnectionState::Connected,
            state: shared.state,
            identity: shared.identity.clone(),
            has_valid_token: self.qr.get_token().is_some(),
        }
    }

    /// Current non-expired pairing token, if any.
    pub fn pairing_token(&self) -> Option<PairingCode> {
        self.qr.get_token()
    }

    /// Identity of the authenticated account while connected.
    pub fn connected_identity(&self) -> Option<ConnectedIdentity> {
        self.shared.lock().unwrap().identity.clone()
    }

    /// Dispatch an outbound message through the live session.
    pub async fn send_message(&self, request: SendRequest) -> WaResult<SendReceipt> {
        let session = {
            let shared = self.shared.lock().unwrap();
            if shared.state != ConnectionState::Connected {
                return Err(WaError::NotConnected);
            }
            shared.session.clone().ok_or(WaError::NotConnected)?
        };
        // The lock is not held across the sends: a reconnect beginning
        // mid-dispatch lets the in-flight send fail naturally.
        dispatch::dispatch(session.as_ref(), &request).await
    }
}

fn identity_from_address(address: String) -> ConnectedIdentity {
    let digits: String = address.chars().filter(|c| c.is_ascii_digit()).collect();
    let formatted = if digits.is_empty() {
        None
    } else {
        Some(format_phone_number(&digits))
    };
    ConnectedIdentity { address, formatted }
}

/// Display form for a digits-only phone number.
///
/// Brazilian numbers with country code get the `(XX) XXXXX-..` shape;
/// anything else passes through unchanged.
fn format_phone_number(digits: &str) -> String {
    if digits.len() < 10 {
        return digits.to_string();
    }
    if digits.len() == 11 && digits.starts_with("55") {
        return format!("({}) {}-{}", &digits[2..4], &digits[4..9], &digits[9..]);
    }
    digits.to_string()
}
