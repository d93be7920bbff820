//! Transport engine backed by the `webrtc` crate.
//!
//! Every peer connection shares one UDP socket through the ICE UDP mux, so
//! a single forwarded port is enough for all clients. Each session carries a
//! single data channel configured like UDP (unordered, no retransmits by
//! default).

use crate::config::ServerConfig;
use crate::error::TransportError;
use crate::transport::{
    ChannelMessage, ChannelOptions, ConnectionState, IceCandidate, SessionDescription,
    TransportEngine, TransportEvent, TransportEvents, TransportSession,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc_ice::udp_mux::{UDPMuxDefault, UDPMuxParams};
use webrtc_ice::udp_network::UDPNetwork;

/// Label of the data channel every session opens
pub const DATA_CHANNEL_LABEL: &str = "rallybox";

/// Engine shared by every handshake of one server instance
pub struct RtcEngine {
    api: API,
}

impl RtcEngine {
    /// Bind the shared UDP socket and build the WebRTC API around it
    pub async fn new(config: &ServerConfig) -> Result<Self, TransportError> {
        let addr = SocketAddr::new(config.bind_addr.ip(), config.udp_port());
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::Open(format!("bind udp {addr}: {e}")))?;
        info!(%addr, "ICE UDP mux listening");

        let mut settings = SettingEngine::default();
        settings.set_udp_network(UDPNetwork::Muxed(UDPMuxDefault::new(
            UDPMuxParams::new(socket),
        )));
        if !config.nat_1to1_ips.is_empty() {
            settings.set_nat_1to1_ips(config.nat_1to1_ips.clone(), RTCIceCandidateType::Host);
        }

        let api = APIBuilder::new().with_setting_engine(settings).build();
        Ok(Self { api })
    }
}

#[async_trait]
impl TransportEngine for RtcEngine {
    async fn open(
        &self,
        options: ChannelOptions,
    ) -> Result<(Arc<dyn TransportSession>, TransportEvents), TransportError> {
        let pc = self
            .api
            .new_peer_connection(RTCConfiguration::default())
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;
        let pc = Arc::new(pc);

        let init = RTCDataChannelInit {
            ordered: Some(options.ordered),
            max_retransmits: Some(options.max_retransmits),
            ..Default::default()
        };
        let channel = pc
            .create_data_channel(DATA_CHANNEL_LABEL, Some(init))
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        install_handlers(&pc, &channel, tx);

        let session: Arc<dyn TransportSession> = Arc::new(RtcSession { pc, channel });
        Ok((session, rx))
    }
}

fn install_handlers(
    pc: &RTCPeerConnection,
    channel: &RTCDataChannel,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let events = tx.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        debug!(?state, "peer connection state changed");
        let mapped = match state {
            RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
            RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
            RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
            RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
            // Connected is reported once the data channel opens.
            _ => None,
        };
        if let Some(state) = mapped {
            let _ = events.send(TransportEvent::StateChanged(state));
        }
        Box::pin(async {})
    }));

    let events = tx.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(TransportEvent::Candidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
                Err(err) => warn!(error = %err, "failed to serialize ICE candidate"),
            }
        }
        Box::pin(async {})
    }));

    let events = tx.clone();
    channel.on_open(Box::new(move || {
        let _ = events.send(TransportEvent::StateChanged(ConnectionState::Connected));
        Box::pin(async {})
    }));

    let events = tx.clone();
    channel.on_close(Box::new(move || {
        let _ = events.send(TransportEvent::StateChanged(ConnectionState::Closed));
        Box::pin(async {})
    }));

    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let _ = tx.send(TransportEvent::Message(ChannelMessage { data: msg.data }));
        Box::pin(async {})
    }));
}

struct RtcSession {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl TransportSession for RtcSession {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Offer(e.to_string()))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| TransportError::Offer(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let answer = RTCSessionDescription::answer(description.sdp)
            .map_err(|e| TransportError::RemoteDescription(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| TransportError::RemoteDescription(e.to_string()))
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.channel
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn send_bytes(&self, data: Bytes) -> Result<(), TransportError> {
        self.channel
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc
            .close()
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}
