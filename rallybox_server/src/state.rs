//! Session registry and room directory.
//!
//! Both live behind a single lock so a peer's own room set and each room's
//! member set can never disagree.

use crate::error::HandshakeError;
use crate::peer::Peer;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Session identifier: a time-ordered UUID rendered as 32 hex digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for SessionId {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HandshakeError::InvalidSessionId);
        }
        Uuid::try_parse(s)
            .map(SessionId)
            .map_err(|_| HandshakeError::InvalidSessionId)
    }
}

impl Serialize for SessionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Room identifier
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl From<&str> for RoomId {
    fn from(name: &str) -> Self {
        RoomId(name.to_string())
    }
}

impl From<String> for RoomId {
    fn from(name: String) -> Self {
        RoomId(name)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered peer and the rooms it belongs to
struct PeerEntry {
    peer: Arc<Peer>,
    rooms: BTreeSet<RoomId>,
}

#[derive(Default)]
struct InnerState {
    /// Map of session id -> peer
    peers: HashMap<SessionId, PeerEntry>,
    /// Map of room -> peers in that room
    rooms: HashMap<RoomId, HashSet<SessionId>>,
}

impl InnerState {
    fn leave(&mut self, id: SessionId, room: &RoomId) {
        if let Some(entry) = self.peers.get_mut(&id) {
            entry.rooms.remove(room);
        }
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    fn leave_all(&mut self, id: SessionId) -> Vec<RoomId> {
        let rooms: Vec<RoomId> = self
            .peers
            .get(&id)
            .map(|e| e.rooms.iter().cloned().collect())
            .unwrap_or_default();
        for room in &rooms {
            self.leave(id, room);
        }
        rooms
    }
}

/// Shared handle to the registry and room directory
#[derive(Default, Clone)]
pub struct ServerState {
    inner: Arc<Mutex<InnerState>>,
}

impl ServerState {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new peer
    pub fn insert(&self, peer: Arc<Peer>) {
        let entry = PeerEntry {
            peer: peer.clone(),
            rooms: BTreeSet::new(),
        };
        self.inner.lock().peers.insert(peer.id(), entry);
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Peer>> {
        self.inner.lock().peers.get(&id).map(|e| e.peer.clone())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.inner.lock().peers.contains_key(&id)
    }

    /// Remove a peer, leaving every room it is in first
    pub fn remove(&self, id: SessionId) -> Option<Arc<Peer>> {
        let mut state = self.inner.lock();
        state.leave_all(id);
        state.peers.remove(&id).map(|e| e.peer)
    }

    /// All registered peers, oldest first
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        let state = self.inner.lock();
        let mut peers: Vec<Arc<Peer>> = state.peers.values().map(|e| e.peer.clone()).collect();
        peers.sort_by_key(|p| p.id());
        peers
    }

    pub fn len(&self) -> usize {
        self.inner.lock().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a peer to rooms, creating them as needed.
    ///
    /// Returns false if the peer is not registered.
    pub fn join(&self, id: SessionId, rooms: &[RoomId]) -> bool {
        let mut state = self.inner.lock();
        let Some(entry) = state.peers.get_mut(&id) else {
            return false;
        };
        entry.rooms.extend(rooms.iter().cloned());
        for room in rooms {
            state.rooms.entry(room.clone()).or_default().insert(id);
        }
        true
    }

    /// Remove a peer from rooms; rooms left empty are deleted.
    ///
    /// Returns false if the peer is not registered.
    pub fn leave(&self, id: SessionId, rooms: &[RoomId]) -> bool {
        let mut state = self.inner.lock();
        if !state.peers.contains_key(&id) {
            return false;
        }
        for room in rooms {
            state.leave(id, room);
        }
        true
    }

    /// Remove a peer from every room it is in, returning those rooms
    pub fn leave_all(&self, id: SessionId) -> Vec<RoomId> {
        self.inner.lock().leave_all(id)
    }

    /// Rooms a peer belongs to
    pub fn rooms_of(&self, id: SessionId) -> Vec<RoomId> {
        self.inner
            .lock()
            .peers
            .get(&id)
            .map(|e| e.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every non-empty room and its member count
    pub fn rooms(&self) -> BTreeMap<RoomId, usize> {
        self.inner
            .lock()
            .rooms
            .iter()
            .map(|(room, members)| (room.clone(), members.len()))
            .collect()
    }

    /// Get all peers in a room
    pub fn room_members(&self, room: &RoomId) -> Vec<SessionId> {
        let state = self.inner.lock();
        let mut members: Vec<SessionId> = state
            .rooms
            .get(room)
            .map(|peers| peers.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Union of the members of `rooms`, oldest first.
    ///
    /// With a caller and no room names, the caller's own rooms are used. The
    /// caller is added when `include_caller` is set and removed otherwise.
    pub fn resolve(
        &self,
        caller: Option<SessionId>,
        rooms: &[RoomId],
        include_caller: bool,
    ) -> Vec<Arc<Peer>> {
        let state = self.inner.lock();
        let own_rooms: Vec<RoomId>;
        let rooms = match caller {
            Some(id) if rooms.is_empty() => {
                own_rooms = state
                    .peers
                    .get(&id)
                    .map(|e| e.rooms.iter().cloned().collect())
                    .unwrap_or_default();
                &own_rooms[..]
            }
            _ => rooms,
        };

        let mut ids: BTreeSet<SessionId> = rooms
            .iter()
            .filter_map(|room| state.rooms.get(room))
            .flat_map(|members| members.iter().copied())
            .collect();
        if let Some(id) = caller {
            if include_caller && state.peers.contains_key(&id) {
                ids.insert(id);
            } else {
                ids.remove(&id);
            }
        }

        ids.into_iter()
            .filter_map(|id| state.peers.get(&id).map(|e| e.peer.clone()))
            .collect()
    }
}
