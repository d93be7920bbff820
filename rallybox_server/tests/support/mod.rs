//! In-memory transport used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rallybox_server::error::TransportError;
use rallybox_server::transport::{
    ChannelMessage, ChannelOptions, ConnectionState, IceCandidate, SessionDescription,
    TransportEngine, TransportEvent, TransportEvents, TransportSession,
};
use rallybox_server::{Server, ServerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Something written to a mock data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Bytes(Bytes),
}

#[derive(Default)]
pub struct MockEngine {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    fail_offers: AtomicBool,
    options: Mutex<Vec<ChannelOptions>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every session opened after this call fails to produce an offer
    pub fn fail_offers(&self) {
        self.fail_offers.store(true, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    pub fn last_session(&self) -> Arc<MockSession> {
        self.sessions
            .lock()
            .last()
            .cloned()
            .expect("no session opened")
    }

    /// Channel options passed to each `open` call
    pub fn options(&self) -> Vec<ChannelOptions> {
        self.options.lock().clone()
    }
}

#[async_trait]
impl TransportEngine for MockEngine {
    async fn open(
        &self,
        options: ChannelOptions,
    ) -> Result<(Arc<dyn TransportSession>, TransportEvents), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(MockSession {
            events: Mutex::new(Some(tx)),
            sent: Mutex::new(Vec::new()),
            remote: Mutex::new(None),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            fail_offer: self.fail_offers.load(Ordering::SeqCst),
        });
        self.sessions.lock().push(session.clone());
        self.options.lock().push(options);
        Ok((session, rx))
    }
}

pub struct MockSession {
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    sent: Mutex<Vec<Sent>>,
    remote: Mutex<Option<SessionDescription>>,
    open: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    fail_sends: AtomicBool,
    fail_offer: bool,
}

impl MockSession {
    pub fn push(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Open the data channel and report it; sends fail until then
    pub fn connect(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.push(TransportEvent::StateChanged(ConnectionState::Connected));
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.push(TransportEvent::StateChanged(state));
    }

    pub fn candidate(&self, candidate: &str) {
        self.push(TransportEvent::Candidate(IceCandidate {
            candidate: candidate.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }));
    }

    /// Deliver a text message from the client
    pub fn receive_text(&self, text: &str) {
        self.push(TransportEvent::Message(ChannelMessage {
            data: Bytes::copy_from_slice(text.as_bytes()),
        }));
    }

    pub fn receive_bytes(&self, data: &[u8]) {
        self.push(TransportEvent::Message(ChannelMessage {
            data: Bytes::copy_from_slice(data),
        }));
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Text(text) => Some(text.clone()),
                Sent::Bytes(_) => None,
            })
            .collect()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// How many times the session was released
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn check_send(&self) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Send("channel not open".to_string()));
        }
        if self.fail_sends.load(Ordering::SeqCst) || self.is_closed() {
            return Err(TransportError::Send("channel closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        if self.fail_offer {
            return Err(TransportError::Offer("no local description".to_string()));
        }
        Ok(SessionDescription::offer("v=0\r\ns=mock\r\n"))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.check_send()?;
        self.sent.lock().push(Sent::Text(text));
        Ok(())
    }

    async fn send_bytes(&self, data: Bytes) -> Result<(), TransportError> {
        self.check_send()?;
        self.sent.lock().push(Sent::Bytes(data));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().take();
        Ok(())
    }
}

pub fn server() -> (Server, Arc<MockEngine>) {
    server_with(ServerConfig::default())
}

pub fn server_with(config: ServerConfig) -> (Server, Arc<MockEngine>) {
    let engine = MockEngine::new();
    (Server::new(config, engine.clone()), engine)
}

/// Poll `check` until it holds, failing the test after two seconds
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
