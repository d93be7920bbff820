//! HTTP surface for the signaling handshake
//!
//! The handshake is store-and-forward over plain request/response calls:
//!
//! - `POST {prefix}/connections` creates a session and returns its offer
//! - `POST {prefix}/connections/{id}/remote-description` applies the answer
//! - `GET {prefix}/connections/{id}/additional-candidates` returns every
//!   candidate gathered so far (clients deduplicate)

use crate::config::CorsConfig;
use crate::error::HandshakeError;
use crate::server::Server;
use crate::transport::SessionDescription;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::io;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "handshake request failed");
        } else {
            debug!(error = %self, "handshake request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

/// Handshake Begin
async fn create_connection(State(server): State<Server>) -> Result<Response, HandshakeError> {
    let offer = server.open_connection().await?;
    let body = serde_json::to_vec(&offer)?;
    Ok(json_response(body))
}

/// Handshake Complete
async fn set_remote_description(
    State(server): State<Server>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, HandshakeError> {
    let description: SessionDescription = serde_json::from_slice(&body)
        .map_err(|e| HandshakeError::InvalidBody(e.to_string()))?;
    server.set_remote_description(&id, description).await?;
    Ok(StatusCode::OK)
}

/// Candidate poll
async fn additional_candidates(
    State(server): State<Server>,
    Path(id): Path<String>,
) -> Result<Response, HandshakeError> {
    let candidates = server.additional_candidates(&id)?;
    let body = serde_json::to_vec(&candidates)?;
    Ok(json_response(body))
}

fn json_response(body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let mut headers = vec![header::CONTENT_TYPE];
    if cors.allow_authorization {
        headers.push(header::AUTHORIZATION);
    }
    let origin = if cors.origin == "*" {
        AllowOrigin::from(Any)
    } else {
        match HeaderValue::from_str(&cors.origin) {
            Ok(origin) => AllowOrigin::exact(origin),
            Err(_) => {
                warn!(origin = %cors.origin, "invalid CORS origin; allowing any");
                AllowOrigin::from(Any)
            }
        }
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(headers)
}

/// Router for the handshake routes, nested under the configured prefix
pub fn router(server: Server) -> Router {
    let config = server.config();
    let cors = cors_layer(&config.cors);
    let prefix = config.route_prefix.clone();

    let routes = Router::new()
        .route("/connections", post(create_connection))
        .route(
            "/connections/:id/remote-description",
            post(set_remote_description),
        )
        .route(
            "/connections/:id/additional-candidates",
            get(additional_candidates),
        );

    let app = if prefix.is_empty() || prefix == "/" {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    };

    app.with_state(server)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve the handshake routes until the listener fails
pub async fn serve(server: Server) -> io::Result<()> {
    let addr = server.config().bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "signaling HTTP surface listening");
    axum::serve(listener, router(server)).await
}
