//! Error types for the session server

use axum::http::StatusCode;
use thiserror::Error;

/// Errors that can occur while acting on a connected peer
#[derive(Error, Debug)]
pub enum SignalingError {
    /// The peer's outbound channel is gone (peer disconnected)
    #[error("Channel closed")]
    ChannelClosed,

    /// A listener was registered for an event it cannot receive
    #[error("Listener shape does not match event '{0}'")]
    ListenerShape(String),
}

/// Errors from the transport engine
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to create the peer connection or its data channel
    #[error("Failed to open session: {0}")]
    Open(String),

    /// Failed to create or apply the local offer
    #[error("Failed to prepare offer: {0}")]
    Offer(String),

    /// Failed to apply the remote description
    #[error("Failed to set remote description: {0}")]
    RemoteDescription(String),

    /// Failed to send on the data channel
    #[error("Failed to send message: {0}")]
    Send(String),

    /// Failed to release the connection
    #[error("Failed to close: {0}")]
    Close(String),
}

/// Errors from handshake requests
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// Request body could not be read or parsed
    #[error("Invalid body: {0}")]
    InvalidBody(String),

    /// Description type other than "answer"
    #[error("Unexpected description type '{0}'")]
    UnexpectedType(String),

    /// Session id does not have the expected shape
    #[error("Invalid session id")]
    InvalidSessionId,

    /// No session registered under the id
    #[error("Unknown session")]
    UnknownSession,

    /// Offer preparation failed
    #[error("Offer failed: {0}")]
    OfferFailed(#[source] TransportError),

    /// The transport rejected the remote description
    #[error("Remote description rejected: {0}")]
    RemoteRejected(#[source] TransportError),

    /// Response serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HandshakeError {
    /// HTTP status reported for this error
    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
