//! A single connected client: identity, candidates, listeners and the
//! outbound side of its data channel.

use crate::codec::{self, Inbound};
use crate::emitter::{DISCONNECTED, EventEmitter, PeerListener, PeerPayload, RAW_MESSAGE};
use crate::error::{SignalingError, TransportError};
use crate::reliable::{self, PendingAcks, RecentIds, Reliable};
use crate::server::{self, ServerShared};
use crate::state::{RoomId, SessionId};
use crate::transport::{ChannelMessage, IceCandidate, SessionDescription, TransportSession};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// One item queued for the data channel writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outbound {
    Text(String),
    Bytes(Bytes),
}

/// Per-call options for [`Peer::emit_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitOptions {
    pub reliable: Option<Reliable>,
}

impl EmitOptions {
    pub fn reliable(interval: Duration, repeat: u32) -> Self {
        Self {
            reliable: Some(Reliable::new(interval, repeat)),
        }
    }
}

/// Server-side state of one client connection
pub struct Peer {
    id: SessionId,
    created_at: Instant,
    candidate_window: Option<Duration>,
    candidates: Mutex<Vec<IceCandidate>>,
    events: EventEmitter<PeerListener>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    transport: Mutex<Option<Arc<dyn TransportSession>>>,
    pending_acks: PendingAcks,
    recent_ids: RecentIds,
    connected: AtomicBool,
    closing: AtomicBool,
    server: Weak<ServerShared>,
    me: Weak<Peer>,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}

impl Peer {
    pub(crate) fn new(
        id: SessionId,
        server: Weak<ServerShared>,
        transport: Option<Arc<dyn TransportSession>>,
        outbound: mpsc::UnboundedSender<Outbound>,
        candidate_window: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Peer {
            id,
            created_at: Instant::now(),
            candidate_window,
            candidates: Mutex::new(Vec::new()),
            events: EventEmitter::new(),
            outbound: Mutex::new(Some(outbound)),
            transport: Mutex::new(transport),
            pending_acks: PendingAcks::default(),
            recent_ids: RecentIds::default(),
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            server,
            me: me.clone(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The peer's own listener registry
    pub fn events(&self) -> &EventEmitter<PeerListener> {
        &self.events
    }

    /// Register a listener; its shape must match the event
    pub fn on(&self, event: &str, listener: PeerListener) -> Result<(), SignalingError> {
        self.events.on(event, listener).map(|_| ())
    }

    pub fn off(&self, event: &str, listener: &PeerListener) -> bool {
        self.events.off(event, listener)
    }

    /// Register a handler for an application event.
    ///
    /// Returns the listener so it can later be passed to [`Peer::off`].
    pub fn on_message(
        &self,
        event: &str,
        f: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<PeerListener, SignalingError> {
        let listener = PeerListener::message(f);
        self.on(event, listener.clone())?;
        Ok(listener)
    }

    /// Register a handler for payloads that are not JSON envelopes
    pub fn on_raw(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> PeerListener {
        let listener = PeerListener::raw(f);
        self.events.push(RAW_MESSAGE, listener.clone());
        listener
    }

    pub fn on_disconnected(&self, f: impl Fn() + Send + Sync + 'static) -> PeerListener {
        let listener = PeerListener::lifecycle(f);
        self.events.push(DISCONNECTED, listener.clone());
        listener
    }

    /// Record a candidate discovered by the transport.
    ///
    /// Candidates arriving after the gather window (if any) are dropped.
    pub fn add_candidate(&self, candidate: IceCandidate) {
        if let Some(window) = self.candidate_window {
            if self.created_at.elapsed() > window {
                debug!(session_id = %self.id, "candidate arrived after gather window; dropped");
                return;
            }
        }
        self.candidates.lock().push(candidate);
    }

    /// Every candidate accumulated so far
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    /// Send `{"<event>": <parts joined>}`
    pub fn emit(&self, event: &str, parts: &[&str]) -> Result<(), SignalingError> {
        self.emit_with(event, parts, EmitOptions::default())
    }

    pub fn emit_with(
        &self,
        event: &str,
        parts: &[&str],
        options: EmitOptions,
    ) -> Result<(), SignalingError> {
        match options.reliable {
            None => self.send(Outbound::Text(codec::encode(event, parts))),
            Some(reliable) => self.emit_reliable(event, parts, reliable),
        }
    }

    /// Send bytes as they are, without an envelope
    pub fn emit_raw(&self, data: impl Into<Bytes>) -> Result<(), SignalingError> {
        self.send(Outbound::Bytes(data.into()))
    }

    fn emit_reliable(
        &self,
        event: &str,
        parts: &[&str],
        reliable: Reliable,
    ) -> Result<(), SignalingError> {
        let message_id = Uuid::new_v4().simple().to_string();
        let wire = codec::encode_reliable(event, parts, &message_id);
        self.send(Outbound::Text(wire.clone()))?;
        if reliable.repeat <= 1 {
            return Ok(());
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %self.id, "no runtime for redelivery; sent once");
            return Ok(());
        };
        let acked = self.pending_acks.register(&message_id);
        let me = self.me.clone();
        runtime.spawn(async move {
            let resend = {
                let me = me.clone();
                move || match me.upgrade() {
                    Some(peer) => peer.send(Outbound::Text(wire.clone())).is_ok(),
                    None => false,
                }
            };
            let sent = reliable::redeliver(reliable, acked, resend).await;
            if let Some(peer) = me.upgrade() {
                peer.pending_acks.forget(&message_id);
                debug!(session_id = %peer.id, %message_id, sent, "reliable emission finished");
            }
        });
        Ok(())
    }

    fn send(&self, message: Outbound) -> Result<(), SignalingError> {
        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(SignalingError::ChannelClosed)?;
        sender
            .send(message)
            .map_err(|_| SignalingError::ChannelClosed)
    }

    /// Rooms this peer currently belongs to
    pub fn rooms(&self) -> Vec<RoomId> {
        match self.server.upgrade() {
            Some(server) => server.state.rooms_of(self.id),
            None => Vec::new(),
        }
    }

    /// Join rooms, creating them as needed
    pub fn join(&self, rooms: &[&str]) {
        let Some(server) = self.server.upgrade() else {
            warn!(session_id = %self.id, "join ignored: server is gone");
            return;
        };
        if !server.state.join(self.id, &room_ids(rooms)) {
            warn!(session_id = %self.id, "join ignored: peer is not registered");
        }
    }

    /// Leave rooms; rooms left empty disappear
    pub fn leave(&self, rooms: &[&str]) {
        let Some(server) = self.server.upgrade() else {
            warn!(session_id = %self.id, "leave ignored: server is gone");
            return;
        };
        if !server.state.leave(self.id, &room_ids(rooms)) {
            warn!(session_id = %self.id, "leave ignored: peer is not registered");
        }
    }

    /// Members of `rooms` (default: this peer's rooms), including this peer
    pub fn room(&self, rooms: &[&str]) -> Recipients {
        self.resolve(rooms, true)
    }

    /// Members of `rooms` (default: this peer's rooms), excluding this peer
    pub fn broadcast(&self, rooms: &[&str]) -> Recipients {
        self.resolve(rooms, false)
    }

    fn resolve(&self, rooms: &[&str], include_self: bool) -> Recipients {
        let mut peers = match self.server.upgrade() {
            Some(server) => server
                .state
                .resolve(Some(self.id), &room_ids(rooms), include_self),
            None => Vec::new(),
        };
        // A peer that is already torn down still addresses itself.
        if include_self && !peers.iter().any(|p| p.id == self.id) {
            if let Some(me) = self.me.upgrade() {
                peers.insert(0, me);
            }
        }
        Recipients(peers)
    }

    /// Tear this peer down; later calls do nothing
    pub async fn disconnect(&self) {
        match self.server.upgrade() {
            Some(shared) => server::disconnect(&shared, self.id).await,
            None => debug!(session_id = %self.id, "disconnect ignored: server is gone"),
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Whether the data channel has opened
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Record that the data channel opened; true the first time
    pub(crate) fn mark_connected(&self) -> bool {
        !self.connected.swap(true, Ordering::AcqRel)
    }

    /// Claim the teardown; true for exactly one caller
    pub(crate) fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::AcqRel)
    }

    pub(crate) async fn apply_answer(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let transport = self.transport.lock().clone();
        match transport {
            Some(transport) => transport.set_remote_description(description).await,
            None => Err(TransportError::RemoteDescription(
                "session already closed".to_string(),
            )),
        }
    }

    pub(crate) async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let transport = self.transport.lock().clone();
        match transport {
            Some(transport) => transport.create_offer().await,
            None => Err(TransportError::Offer("session already closed".to_string())),
        }
    }

    /// Stop the writer and close the transport
    pub(crate) async fn release(&self) {
        self.outbound.lock().take();
        self.pending_acks.clear();
        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            if let Err(err) = transport.close().await {
                warn!(session_id = %self.id, error = %err, "failed to release transport");
            }
        }
        self.events.clear();
    }

    /// Decode one inbound data channel message and dispatch what it carries
    pub(crate) fn dispatch(&self, message: &ChannelMessage) {
        for item in codec::decode(&message.data) {
            match item {
                Inbound::Raw(data) => {
                    if !self.events.emit(RAW_MESSAGE, &PeerPayload::Bytes(data)) {
                        debug!(session_id = %self.id, "raw message without listener");
                    }
                }
                Inbound::Ack(message_id) => {
                    if !self.pending_acks.ack(&message_id) {
                        debug!(session_id = %self.id, %message_id, "ack for unknown message");
                    }
                }
                Inbound::Event {
                    event,
                    payload,
                    reliable,
                } => {
                    if let Some(message_id) = reliable.and_then(|tag| tag.id) {
                        if let Err(err) = self.send(Outbound::Text(codec::encode_ack(&message_id)))
                        {
                            debug!(session_id = %self.id, error = %err, "could not acknowledge");
                        }
                        if !self.recent_ids.first_sight(&message_id) {
                            debug!(session_id = %self.id, %message_id, "duplicate reliable message");
                            continue;
                        }
                    }
                    if !self.events.emit(&event, &PeerPayload::Text(payload)) {
                        debug!(session_id = %self.id, %event, "event without listener");
                    }
                }
            }
        }
    }
}

fn room_ids(rooms: &[&str]) -> Vec<RoomId> {
    rooms.iter().map(|r| RoomId::from(*r)).collect()
}

/// A resolved set of peers that can be addressed together
#[derive(Debug, Clone, Default)]
pub struct Recipients(Vec<Arc<Peer>>);

impl Recipients {
    pub(crate) fn new(peers: Vec<Arc<Peer>>) -> Self {
        Recipients(peers)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.0.iter().any(|p| p.id == id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.0.iter().map(|p| p.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Peer>> {
        self.0.iter()
    }

    /// Emit to every member; returns how many accepted the message
    pub fn emit(&self, event: &str, parts: &[&str]) -> usize {
        self.emit_with(event, parts, EmitOptions::default())
    }

    pub fn emit_with(&self, event: &str, parts: &[&str], options: EmitOptions) -> usize {
        self.each(|peer| peer.emit_with(event, parts, options))
    }

    pub fn emit_raw(&self, data: impl Into<Bytes>) -> usize {
        let data = data.into();
        self.each(|peer| peer.emit_raw(data.clone()))
    }

    fn each(&self, f: impl Fn(&Peer) -> Result<(), SignalingError>) -> usize {
        self.0
            .iter()
            .filter(|peer| match f(peer) {
                Ok(()) => true,
                Err(err) => {
                    warn!(session_id = %peer.id, error = %err, "emit to peer failed");
                    false
                }
            })
            .count()
    }
}

impl IntoIterator for Recipients {
    type Item = Arc<Peer>;
    type IntoIter = std::vec::IntoIter<Arc<Peer>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
