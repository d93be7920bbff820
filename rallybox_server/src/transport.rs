//! The seam between the session layer and the engine that actually moves
//! bytes (connectivity, encryption, congestion control).
//!
//! An engine opens one [`TransportSession`] per handshake and reports
//! everything asynchronous (state changes, gathered candidates, inbound
//! messages) on a per-session event channel. The server drains that channel
//! in a single task, so events for one session are never reordered.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Data channel options for a new session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    pub ordered: bool,
    pub max_retransmits: u16,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            ordered: false,
            max_retransmits: 0,
        }
    }
}

/// An opaque session description blob (offer or answer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// A connectivity candidate, serialized the way browsers expect it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Connectivity state reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the session can never carry messages again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

/// One message received on the data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub data: Bytes,
}

/// Asynchronous notifications from the engine for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    Candidate(IceCandidate),
    Message(ChannelMessage),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// One peer connection with its single data channel
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Create an offer and apply it as the local description
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Apply the client's answer
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;

    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    async fn send_bytes(&self, data: Bytes) -> Result<(), TransportError>;

    /// Release the connection and everything it holds
    async fn close(&self) -> Result<(), TransportError>;
}

/// Factory for transport sessions, shared by every handshake
#[async_trait]
pub trait TransportEngine: Send + Sync {
    async fn open(
        &self,
        options: ChannelOptions,
    ) -> Result<(Arc<dyn TransportSession>, TransportEvents), TransportError>;
}
