//! Standalone session server with a ping/pong demo handler

use anyhow::Context;
use clap::Parser;
use rallybox_server::{CorsConfig, Server, ServerConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rallybox-server", version, about)]
struct Cli {
    /// HTTP listen address
    #[arg(long, env = "RALLYBOX_BIND", default_value = "0.0.0.0:9208")]
    bind: SocketAddr,

    /// UDP port shared by all peer connections (defaults to the HTTP port)
    #[arg(long, env = "RALLYBOX_UDP_PORT")]
    udp_port: Option<u16>,

    /// Deliver data channel messages in order
    #[arg(long, env = "RALLYBOX_ORDERED")]
    ordered: bool,

    #[arg(long, env = "RALLYBOX_CORS_ORIGIN", default_value = "*")]
    cors_origin: String,

    /// Allow the Authorization header in CORS requests
    #[arg(long, env = "RALLYBOX_ALLOW_AUTHORIZATION")]
    allow_authorization: bool,

    /// External IP advertised as a host candidate (repeatable)
    #[arg(long = "nat-1to1-ip", env = "RALLYBOX_NAT_1TO1_IPS", value_delimiter = ',')]
    nat_1to1_ips: Vec<String>,

    /// Stop collecting candidates this many seconds after a session starts
    #[arg(long, env = "RALLYBOX_CANDIDATE_TIMEOUT_SECS")]
    candidate_timeout_secs: Option<u64>,

    /// Don't serve the HTTP handshake routes
    #[arg(long, env = "RALLYBOX_DISABLE_HTTP")]
    disable_http: bool,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            ordered: self.ordered,
            cors: CorsConfig {
                origin: self.cors_origin,
                allow_authorization: self.allow_authorization,
            },
            disable_http: self.disable_http,
            bind_addr: self.bind,
            udp_port: self.udp_port,
            nat_1to1_ips: self.nat_1to1_ips,
            candidate_gather_timeout: self.candidate_timeout_secs.map(Duration::from_secs),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,webrtc=warn,webrtc_ice=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Cli::parse().into_config();
    let server = Server::bind(config)
        .await
        .context("failed to start transport engine")?;

    server.on_connection(|peer| {
        info!(session_id = %peer.id(), "client connected");
        let me = peer.clone();
        let registered = peer.on_message("ping", move |msg| {
            info!(session_id = %me.id(), %msg, "ping");
            if let Err(err) = me.emit("pong", &["world"]) {
                warn!(session_id = %me.id(), error = %err, "pong failed");
            }
        });
        if let Err(err) = registered {
            warn!(error = %err, "could not register ping handler");
        }
    });
    server.on_disconnected(|peer| {
        info!(session_id = %peer.id(), "client disconnected");
    });

    if server.config().disable_http {
        info!("HTTP surface disabled; waiting for shutdown");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    tokio::select! {
        result = server.listen() => result.context("HTTP server failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
