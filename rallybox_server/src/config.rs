use std::net::SocketAddr;
use std::time::Duration;

use crate::transport::ChannelOptions;

/// Default port for both the HTTP surface and the shared UDP socket
pub const DEFAULT_PORT: u16 = 9208;

/// Prefix of the handshake routes
pub const DEFAULT_ROUTE_PREFIX: &str = "/.wrtc/v2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    /// Value of `Access-Control-Allow-Origin`
    pub origin: String,
    /// Also allow the `Authorization` request header
    pub allow_authorization: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: "*".to_string(),
            allow_authorization: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub ordered: bool,
    pub max_retransmits: u16,
    pub cors: CorsConfig,
    /// Don't serve the HTTP surface from [`crate::Server::listen`]
    pub disable_http: bool,
    pub bind_addr: SocketAddr,
    /// UDP port shared by every peer connection; defaults to the HTTP port
    pub udp_port: Option<u16>,
    /// External addresses advertised as host candidates
    pub nat_1to1_ips: Vec<String>,
    pub route_prefix: String,
    /// Drop candidates discovered later than this after session creation
    pub candidate_gather_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ordered: false,
            max_retransmits: 0,
            cors: CorsConfig::default(),
            disable_http: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            udp_port: None,
            nat_1to1_ips: Vec::new(),
            route_prefix: DEFAULT_ROUTE_PREFIX.to_string(),
            candidate_gather_timeout: None,
        }
    }
}

impl ServerConfig {
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            ordered: self.ordered,
            max_retransmits: self.max_retransmits,
        }
    }

    /// Port of the shared UDP socket
    pub fn udp_port(&self) -> u16 {
        self.udp_port.unwrap_or(self.bind_addr.port())
    }
}
