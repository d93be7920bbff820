//! Room-based session server for UDP-like WebRTC data channels
//!
//! Clients negotiate a WebRTC data channel through a small HTTP handshake,
//! then exchange JSON envelopes with the server. Peers can be grouped into
//! rooms and addressed together.
//!
//! # Handshake
//!
//! All routes live under `/.wrtc/v2` by default:
//!
//! - **POST /connections** - create a session, returns
//!   `{"userData": {}, "id": "<id>", "localDescription": {"type": "offer", "sdp": "..."}}`
//! - **POST /connections/{id}/remote-description** - body
//!   `{"type": "answer", "sdp": "..."}`
//! - **GET /connections/{id}/additional-candidates** - every candidate
//!   gathered so far, as a JSON array
//!
//! ## Messages (both directions)
//!
//! - `{"<event>": "<text>"}` or `{"<event>": {...}}`
//! - `{"<event>": {"MESSAGE": ..., "RELIABLE": 1, "ID": "<id>"}}` - reliable,
//!   acknowledged with `{"RELIABLE_ACK": "<id>"}`
//! - anything that is not a JSON object arrives as `rawMessage`
//!
//! # Example
//!
//! ```no_run
//! use rallybox_server::{Server, ServerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::bind(ServerConfig::default()).await?;
//! server.on_connection(|peer| {
//!     let me = peer.clone();
//!     let _ = peer.on_message("ping", move |msg| {
//!         let _ = me.emit("pong", &[msg]);
//!     });
//! });
//! server.listen().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod emitter;
pub mod error;
pub mod handler;
pub mod peer;
pub mod reliable;
pub mod rtc;
pub mod server;
pub mod state;
pub mod transport;

pub use config::{CorsConfig, ServerConfig};
pub use emitter::{EventEmitter, PeerListener, ServerListener};
pub use error::{HandshakeError, SignalingError, TransportError};
pub use peer::{EmitOptions, Peer, Recipients};
pub use reliable::Reliable;
pub use server::{ConnectionOffer, Server};
pub use state::{RoomId, ServerState, SessionId};
