//! Multi-listener event registry keyed by event name.
//!
//! Listeners come in a closed set of shapes. Peer listeners are either
//! lifecycle callbacks (no arguments), message callbacks (one string
//! payload) or raw callbacks (a byte slice); the shape is checked against
//! the event name when the listener is registered, so a message handler can
//! never end up on `rawMessage`.

use crate::error::SignalingError;
use crate::peer::Peer;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Server event fired when a peer's channel opens
pub const CONNECTION: &str = "connection";
/// Fired once when a peer is torn down
pub const DISCONNECTED: &str = "disconnected";
/// Peer event carrying payloads that are not a JSON envelope
pub const RAW_MESSAGE: &str = "rawMessage";

/// A listener shape the emitter can store and invoke
pub trait Listener: Clone {
    type Args: ?Sized;

    /// Whether this listener can be registered for `event`
    fn accepts(&self, event: &str) -> bool;

    fn call(&self, args: &Self::Args);

    /// Reference identity, used by [`EventEmitter::off`]
    fn same(&self, other: &Self) -> bool;
}

/// Registry mapping event names to ordered listener lists
pub struct EventEmitter<L> {
    listeners: Mutex<HashMap<String, Vec<L>>>,
}

impl<L> Default for EventEmitter<L> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }
}

impl<L> fmt::Debug for EventEmitter<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        let mut map = f.debug_map();
        for (event, list) in listeners.iter() {
            map.entry(event, &list.len());
        }
        map.finish()
    }
}

impl<L: Listener> EventEmitter<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `event`
    pub fn on(&self, event: &str, listener: L) -> Result<&Self, SignalingError> {
        if !listener.accepts(event) {
            return Err(SignalingError::ListenerShape(event.to_string()));
        }
        self.push(event, listener);
        Ok(self)
    }

    /// Append a listener whose shape is known to fit `event`
    pub(crate) fn push(&self, event: &str, listener: L) {
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(listener);
    }

    /// Remove the first listener identical to `listener`.
    ///
    /// The last listener is swapped into the freed slot, so the order of
    /// the remaining listeners is not preserved.
    pub fn off(&self, event: &str, listener: &L) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let Some(index) = list.iter().position(|l| l.same(listener)) else {
            return false;
        };
        list.swap_remove(index);
        if list.is_empty() {
            listeners.remove(event);
        }
        true
    }

    /// Invoke every listener registered for `event` when the call begins.
    ///
    /// Returns whether at least one listener existed. Listeners run without
    /// the registry lock held, so they may register or remove listeners.
    pub fn emit(&self, event: &str, args: &L::Args) -> bool {
        let snapshot: Vec<L> = match self.listeners.lock().get(event) {
            Some(list) => list.clone(),
            None => return false,
        };
        for listener in &snapshot {
            listener.call(args);
        }
        !snapshot.is_empty()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

/// Payload handed to peer listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerPayload {
    Empty,
    Text(String),
    Bytes(Bytes),
}

type LifecycleFn = dyn Fn() + Send + Sync;
type MessageFn = dyn Fn(&str) + Send + Sync;
type RawFn = dyn Fn(&[u8]) + Send + Sync;

/// Listener registered on a single peer
#[derive(Clone)]
pub enum PeerListener {
    Lifecycle(Arc<LifecycleFn>),
    Message(Arc<MessageFn>),
    Raw(Arc<RawFn>),
}

impl PeerListener {
    pub fn lifecycle(f: impl Fn() + Send + Sync + 'static) -> Self {
        PeerListener::Lifecycle(Arc::new(f))
    }

    pub fn message(f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        PeerListener::Message(Arc::new(f))
    }

    pub fn raw(f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        PeerListener::Raw(Arc::new(f))
    }
}

impl fmt::Debug for PeerListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerListener::Lifecycle(_) => f.write_str("PeerListener::Lifecycle"),
            PeerListener::Message(_) => f.write_str("PeerListener::Message"),
            PeerListener::Raw(_) => f.write_str("PeerListener::Raw"),
        }
    }
}

impl Listener for PeerListener {
    type Args = PeerPayload;

    fn accepts(&self, event: &str) -> bool {
        match self {
            PeerListener::Lifecycle(_) => event == DISCONNECTED || event == CONNECTION,
            PeerListener::Raw(_) => event == RAW_MESSAGE,
            PeerListener::Message(_) => {
                event != DISCONNECTED && event != CONNECTION && event != RAW_MESSAGE
            }
        }
    }

    fn call(&self, args: &PeerPayload) {
        match (self, args) {
            (PeerListener::Lifecycle(f), _) => f(),
            (PeerListener::Message(f), PeerPayload::Text(text)) => f(text),
            (PeerListener::Raw(f), PeerPayload::Bytes(data)) => f(data),
            (listener, payload) => {
                warn!(?listener, ?payload, "listener skipped: payload shape mismatch");
            }
        }
    }

    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (PeerListener::Lifecycle(a), PeerListener::Lifecycle(b)) => Arc::ptr_eq(a, b),
            (PeerListener::Message(a), PeerListener::Message(b)) => Arc::ptr_eq(a, b),
            (PeerListener::Raw(a), PeerListener::Raw(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

type PeerFn = dyn Fn(&Arc<Peer>) + Send + Sync;

/// Listener registered on the server; receives the peer the event is about
#[derive(Clone)]
pub struct ServerListener(Arc<PeerFn>);

impl ServerListener {
    pub fn new(f: impl Fn(&Arc<Peer>) + Send + Sync + 'static) -> Self {
        ServerListener(Arc::new(f))
    }
}

impl fmt::Debug for ServerListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerListener")
    }
}

impl Listener for ServerListener {
    type Args = Arc<Peer>;

    fn accepts(&self, _event: &str) -> bool {
        true
    }

    fn call(&self, peer: &Arc<Peer>) {
        (self.0)(peer)
    }

    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
