//! Mock Protocol Stack for Testing
//!
//! Provides MockSessionFactory/MockSession for full coverage of the
//! connection manager and dispatcher without a real messaging network.
//! Tests drive connection signals by emitting events into the live
//! session's channel, exactly as the protocol library would.

use super::traits::*;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Mock session factory
#[derive(Clone, Default)]
pub struct MockSessionFactory {
    state: Arc<Mutex<FactoryState>>,
}

#[derive(Default)]
struct FactoryState {
    opens: u32,
    fail_next_open: Option<String>,
    auth_seen: Vec<AuthBlob>,
    sessions: Vec<Arc<MockSession>>,
    event_senders: Vec<mpsc::Sender<SessionEvent>>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions opened so far.
    pub fn open_count(&self) -> u32 {
        self.state.lock().unwrap().opens
    }

    /// Make the next `open` fail with a network error.
    pub fn fail_next_open(&self, reason: &str) {
        self.state.lock().unwrap().fail_next_open = Some(reason.to_string());
    }

    /// Credential blob passed to the most recent `open`.
    pub fn last_auth(&self) -> Option<AuthBlob> {
        self.state.lock().unwrap().auth_seen.last().cloned()
    }

    /// Most recently opened session.
    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        self.state.lock().unwrap().sessions.last().cloned()
    }

    /// Emit an event on the most recent session's channel.
    pub async fn emit(&self, event: SessionEvent) {
        let sender = self.state.lock().unwrap().event_senders.last().cloned();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    pub async fn emit_pairing_token(&self, token: &str) {
        self.emit(SessionEvent::Connection(ConnectionUpdate {
            pairing_token: Some(token.to_string()),
            ..Default::default()
        }))
        .await;
    }

    pub async fn emit_open(&self) {
        self.emit(SessionEvent::Connection(ConnectionUpdate {
            transition: Some(Transition::Open),
            ..Default::default()
        }))
        .await;
    }

    pub async fn emit_close(&self, cause: DisconnectCause) {
        self.emit(SessionEvent::Connection(ConnectionUpdate {
            transition: Some(Transition::Close(cause)),
            ..Default::default()
        }))
        .await;
    }

    pub async fn emit_creds_update(&self, delta: AuthBlob) {
        self.emit(SessionEvent::CredsUpdate(delta)).await;
    }

    /// Drop the most recent session's event sender, closing its channel
    /// without any close signal.
    pub fn close_event_channel(&self) {
        self.state.lock().unwrap().event_senders.pop();
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    type Session = MockSession;

    async fn open(
        &self,
        auth: AuthBlob,
        events: mpsc::Sender<SessionEvent>,
    ) -> WaResult<Arc<MockSession>> {
        let mut state = self.state.lock().unwrap();
        state.opens += 1;
        if let Some(reason) = state.fail_next_open.take() {
            return Err(WaError::Network(reason));
        }
        state.auth_seen.push(auth);

        let session = Arc::new(MockSession::new());
        state.sessions.push(session.clone());
        state.event_senders.push(events);
        Ok(session)
    }
}

/// Mock live session
#[derive(Default)]
pub struct MockSession {
    state: Mutex<SessionState>,
}

#[derive(Default)]
struct SessionState {
    identity: Option<String>,
    sent: Vec<(Jid, OutboundPayload)>,
    script: VecDeque<Result<MessageId, String>>,
    next_id: u32,
    ended: bool,
    logged_out: bool,
    fail_logout: bool,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the self-identity reported once the session opens.
    pub fn set_identity(&self, address: &str) {
        self.state.lock().unwrap().identity = Some(address.to_string());
    }

    /// Queue a successful send with a fixed id.
    pub fn push_send_ok(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .script
            .push_back(Ok(MessageId(id.to_string())));
    }

    /// Queue a failing send.
    pub fn fail_next_send(&self, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .script
            .push_back(Err(reason.to_string()));
    }

    /// Make `logout` fail (the manager must tolerate this).
    pub fn fail_logout(&self) {
        self.state.lock().unwrap().fail_logout = true;
    }

    /// Every attempted send, in order, including failed ones.
    pub fn sent(&self) -> Vec<(Jid, OutboundPayload)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn ended(&self) -> bool {
        self.state.lock().unwrap().ended
    }

    pub fn logged_out(&self) -> bool {
        self.state.lock().unwrap().logged_out
    }
}

#[async_trait]
impl WaSession for MockSession {
    async fn send(&self, destination: &Jid, payload: OutboundPayload) -> WaResult<MessageId> {
        let mut state = self.state.lock().unwrap();
        state.sent.push((destination.clone(), payload));

        if let Some(scripted) = state.script.pop_front() {
            return scripted.map_err(WaError::Network);
        }
        state.next_id += 1;
        Ok(MessageId(format!("MSG-{}", state.next_id)))
    }

    async fn logout(&self) -> WaResult<()> {
        let mut state = self.state.lock().unwrap();
        state.logged_out = true;
        if state.fail_logout {
            Err(WaError::Protocol("logout refused".to_string()))
        } else {
            Ok(())
        }
    }

    async fn end(&self) -> WaResult<()> {
        self.state.lock().unwrap().ended = true;
        Ok(())
    }

    fn self_identity(&self) -> Option<String> {
        self.state.lock().unwrap().identity.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_records_payload_and_generates_ids() {
        let session = MockSession::new();
        let jid = Jid("1@s.whatsapp.net".to_string());

        let first = session
            .send(
                &jid,
                OutboundPayload::Text {
                    body: "a".to_string(),
                },
            )
            .await
            .unwrap();
        let second = session
            .send(
                &jid,
                OutboundPayload::Text {
                    body: "b".to_string(),
                },
            )
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(session.sent().len(), 2);
    }

    #[tokio::test]
    async fn scripted_results_are_consumed_in_order() {
        let session = MockSession::new();
        session.push_send_ok("MSG-A");
        session.fail_next_send("down");
        let jid = Jid("1@s.whatsapp.net".to_string());
        let text = OutboundPayload::Text {
            body: "x".to_string(),
        };

        let ok = session.send(&jid, text.clone()).await.unwrap();
        assert_eq!(ok, MessageId("MSG-A".to_string()));

        let err = session.send(&jid, text).await;
        assert!(matches!(err, Err(WaError::Network(_))));
    }

    #[tokio::test]
    async fn factory_counts_opens_and_records_auth() {
        let factory = MockSessionFactory::new();
        let (tx, _rx) = mpsc::channel(8);

        let mut auth = AuthBlob::new();
        auth.insert("creds".to_string(), serde_json::json!("blob"));
        factory.open(auth, tx).await.unwrap();

        assert_eq!(factory.open_count(), 1);
        assert!(factory.last_auth().unwrap().contains_key("creds"));
        assert!(factory.last_session().is_some());
    }

    #[tokio::test]
    async fn factory_scripted_open_failure() {
        let factory = MockSessionFactory::new();
        factory.fail_next_open("no route");
        let (tx, _rx) = mpsc::channel(8);

        let result = factory.open(AuthBlob::new(), tx).await;
        assert!(matches!(result, Err(WaError::Network(_))));
        assert_eq!(factory.open_count(), 1);
    }

    #[tokio::test]
    async fn emitted_events_reach_the_session_channel() {
        let factory = MockSessionFactory::new();
        let (tx, mut rx) = mpsc::channel(8);
        factory.open(AuthBlob::new(), tx).await.unwrap();

        factory.emit_pairing_token("2@tok").await;
        match rx.recv().await {
            Some(SessionEvent::Connection(update)) => {
                assert_eq!(update.pairing_token.as_deref(), Some("2@tok"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
