//! The session server: handshake, transport event pump and teardown.

use crate::config::ServerConfig;
use crate::emitter::{CONNECTION, DISCONNECTED, EventEmitter, PeerPayload, ServerListener};
use crate::error::{HandshakeError, TransportError};
use crate::handler;
use crate::peer::{Outbound, Peer, Recipients};
use crate::rtc::RtcEngine;
use crate::state::{RoomId, ServerState, SessionId};
use crate::transport::{
    ConnectionState, IceCandidate, SessionDescription, TransportEngine, TransportEvent,
    TransportEvents, TransportSession,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Body of a successful handshake Begin
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOffer {
    pub user_data: serde_json::Value,
    pub id: SessionId,
    pub local_description: SessionDescription,
}

pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) engine: Arc<dyn TransportEngine>,
    pub(crate) state: ServerState,
    pub(crate) events: EventEmitter<ServerListener>,
}

/// Cheap to clone handle to one server instance
#[derive(Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Server {
    /// Server around an already constructed engine
    pub fn new(config: ServerConfig, engine: Arc<dyn TransportEngine>) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                config,
                engine,
                state: ServerState::new(),
                events: EventEmitter::new(),
            }),
        }
    }

    /// Server backed by WebRTC, sharing one UDP port between all peers
    pub async fn bind(config: ServerConfig) -> Result<Self, TransportError> {
        let engine = RtcEngine::new(&config).await?;
        Ok(Self::new(config, Arc::new(engine)))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> &ServerState {
        &self.shared.state
    }

    /// Server-level listeners (`connection`, `disconnected`)
    pub fn events(&self) -> &EventEmitter<ServerListener> {
        &self.shared.events
    }

    /// Call `f` whenever a peer's channel opens
    pub fn on_connection(&self, f: impl Fn(&Arc<Peer>) + Send + Sync + 'static) -> ServerListener {
        let listener = ServerListener::new(f);
        self.shared.events.push(CONNECTION, listener.clone());
        listener
    }

    /// Call `f` once for every peer that is torn down
    pub fn on_disconnected(
        &self,
        f: impl Fn(&Arc<Peer>) + Send + Sync + 'static,
    ) -> ServerListener {
        let listener = ServerListener::new(f);
        self.shared.events.push(DISCONNECTED, listener.clone());
        listener
    }

    /// Look up a live peer
    pub fn peer(&self, id: SessionId) -> Option<Arc<Peer>> {
        self.shared.state.get(id)
    }

    /// Every registered peer, including those still in the handshake
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.shared.state.peers()
    }

    /// Registered peers whose data channel is open
    pub fn connected_peers(&self) -> Vec<Arc<Peer>> {
        let mut peers = self.peers();
        peers.retain(|peer| peer.is_connected());
        peers
    }

    /// Every non-empty room and its member count
    pub fn rooms(&self) -> BTreeMap<RoomId, usize> {
        self.shared.state.rooms()
    }

    /// Members of the named rooms
    pub fn room(&self, rooms: &[&str]) -> Recipients {
        let rooms: Vec<RoomId> = rooms.iter().map(|r| RoomId::from(*r)).collect();
        Recipients::new(self.shared.state.resolve(None, &rooms, false))
    }

    /// Emit to every connected peer; returns how many accepted it.
    ///
    /// Peers still in the handshake are skipped, since their channel
    /// cannot carry messages yet.
    pub fn emit(&self, event: &str, parts: &[&str]) -> usize {
        Recipients::new(self.connected_peers()).emit(event, parts)
    }

    /// Router for the handshake routes, for embedding in another app
    pub fn router(&self) -> axum::Router {
        handler::router(self.clone())
    }

    /// Serve the handshake routes on the configured address.
    ///
    /// Returns immediately when the HTTP surface is disabled.
    pub async fn listen(&self) -> std::io::Result<()> {
        if self.shared.config.disable_http {
            info!("HTTP surface disabled");
            return Ok(());
        }
        handler::serve(self.clone()).await
    }

    /// Tear a peer down. Unknown or already closing peers are ignored.
    pub async fn disconnect(&self, id: SessionId) {
        disconnect(&self.shared, id).await
    }

    /// Handshake Begin: create a session and return its offer.
    ///
    /// A session whose offer cannot be prepared is discarded again.
    pub async fn open_connection(&self) -> Result<ConnectionOffer, HandshakeError> {
        let (transport, events) = self
            .shared
            .engine
            .open(self.shared.config.channel_options())
            .await
            .map_err(HandshakeError::OfferFailed)?;
        let peer = self.register(transport.clone());
        let id = peer.id();
        tokio::spawn(pump_events(Arc::downgrade(&self.shared), peer.clone(), events));

        match peer.create_offer().await {
            Ok(local_description) => {
                info!(session_id = %id, "session created");
                Ok(ConnectionOffer {
                    user_data: serde_json::json!({}),
                    id,
                    local_description,
                })
            }
            Err(err) => {
                warn!(session_id = %id, error = %err, "offer preparation failed; discarding session");
                discard(&self.shared, &peer).await;
                Err(HandshakeError::OfferFailed(err))
            }
        }
    }

    /// Handshake Complete: apply the client's answer
    pub async fn set_remote_description(
        &self,
        id: &str,
        description: SessionDescription,
    ) -> Result<(), HandshakeError> {
        if description.kind != "answer" {
            return Err(HandshakeError::UnexpectedType(description.kind));
        }
        let peer = self.lookup(id)?;
        peer.apply_answer(description)
            .await
            .map_err(HandshakeError::RemoteRejected)
    }

    /// Handshake candidate poll: everything gathered so far
    pub fn additional_candidates(&self, id: &str) -> Result<Vec<IceCandidate>, HandshakeError> {
        Ok(self.lookup(id)?.candidates())
    }

    fn lookup(&self, id: &str) -> Result<Arc<Peer>, HandshakeError> {
        let id: SessionId = id.parse()?;
        self.peer(id).ok_or(HandshakeError::UnknownSession)
    }

    fn register(&self, transport: Arc<dyn TransportSession>) -> Arc<Peer> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SessionId::new();
        let peer = Peer::new(
            id,
            Arc::downgrade(&self.shared),
            Some(transport.clone()),
            tx,
            self.shared.config.candidate_gather_timeout,
        );
        self.shared.state.insert(peer.clone());
        tokio::spawn(write_outbound(Arc::downgrade(&self.shared), id, transport, rx));
        peer
    }
}

/// Teardown, in order: peer listeners, server listeners, rooms, registry,
/// transport. Only the first caller for a given peer does any of it.
pub(crate) async fn disconnect(shared: &Arc<ServerShared>, id: SessionId) {
    let Some(peer) = shared.state.get(id) else {
        debug!(session_id = %id, "disconnect ignored: unknown session");
        return;
    };
    if !peer.begin_close() {
        debug!(session_id = %id, "disconnect ignored: already closing");
        return;
    }

    info!(session_id = %id, "peer disconnected");
    peer.events().emit(DISCONNECTED, &PeerPayload::Empty);
    shared.events.emit(DISCONNECTED, &peer);
    // Leaves every room before dropping the registry entry.
    shared.state.remove(id);
    peer.release().await;
}

/// Roll back a session that never finished Begin, without notifications
async fn discard(shared: &Arc<ServerShared>, peer: &Arc<Peer>) {
    if !peer.begin_close() {
        return;
    }
    shared.state.remove(peer.id());
    peer.release().await;
}

/// Drain one session's transport events until it closes
async fn pump_events(shared: Weak<ServerShared>, peer: Arc<Peer>, mut events: TransportEvents) {
    let id = peer.id();
    while let Some(event) = events.recv().await {
        if peer.is_closing() {
            break;
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match event {
            TransportEvent::StateChanged(state) if state.is_terminal() => {
                debug!(session_id = %id, ?state, "transport closed");
                disconnect(&shared, id).await;
                break;
            }
            TransportEvent::StateChanged(ConnectionState::Connected) => {
                if peer.mark_connected() {
                    info!(session_id = %id, "peer connected");
                    shared.events.emit(CONNECTION, &peer);
                }
            }
            TransportEvent::StateChanged(state) => {
                debug!(session_id = %id, ?state, "transport state changed");
            }
            TransportEvent::Candidate(candidate) => peer.add_candidate(candidate),
            TransportEvent::Message(message) => peer.dispatch(&message),
        }
    }
    debug!(session_id = %id, "transport event pump finished");
}

/// Write queued messages to the data channel. A failed send disconnects
/// the peer.
async fn write_outbound(
    shared: Weak<ServerShared>,
    id: SessionId,
    transport: Arc<dyn TransportSession>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(message) = outbound.recv().await {
        let result = match message {
            Outbound::Text(text) => transport.send_text(text).await,
            Outbound::Bytes(data) => transport.send_bytes(data).await,
        };
        if let Err(err) = result {
            warn!(session_id = %id, error = %err, "send failed; disconnecting peer");
            if let Some(shared) = shared.upgrade() {
                disconnect(&shared, id).await;
            }
            break;
        }
    }
}
