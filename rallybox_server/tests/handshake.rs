mod support;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use rallybox_server::{CorsConfig, ServerConfig, SessionId};
use serde_json::{Value, json};
use support::{eventually, server, server_with};
use tower::ServiceExt;

const PREFIX: &str = "/.wrtc/v2";

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn begin(app: &Router) -> Value {
    let (status, body) = call(app, Method::POST, &format!("{PREFIX}/connections"), None).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn begin_returns_id_and_offer() {
    let (server, _engine) = server();
    let app = server.router();

    let body = begin(&app).await;
    assert_eq!(body["userData"], json!({}));
    assert_eq!(body["localDescription"]["type"], "offer");
    assert!(body["localDescription"]["sdp"].as_str().unwrap().starts_with("v=0"));

    let id: SessionId = body["id"].as_str().unwrap().parse().unwrap();
    assert!(server.state().contains(id));
}

#[tokio::test]
async fn complete_applies_the_answer() {
    let (server, engine) = server();
    let app = server.router();
    let id = begin(&app).await["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("{PREFIX}/connections/{id}/remote-description"),
        Some(json!({"type": "answer", "sdp": "v=0 answer"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let remote = engine.last_session().remote_description().unwrap();
    assert_eq!(remote.kind, "answer");
    assert_eq!(remote.sdp, "v=0 answer");
}

#[tokio::test]
async fn complete_rejects_an_offer_and_keeps_the_session() {
    let (server, engine) = server();
    let app = server.router();
    let id = begin(&app).await["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("{PREFIX}/connections/{id}/remote-description"),
        Some(json!({"type": "offer", "sdp": "v=0"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let session_id: SessionId = id.parse().unwrap();
    assert!(server.state().contains(session_id));
    assert!(engine.last_session().remote_description().is_none());
    assert!(!engine.last_session().is_closed());

    // The session can still complete afterwards.
    let (status, _) = call(
        &app,
        Method::POST,
        &format!("{PREFIX}/connections/{id}/remote-description"),
        Some(json!({"type": "answer", "sdp": "v=0"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn complete_rejects_malformed_bodies() {
    let (server, _engine) = server();
    let app = server.router();
    let id = begin(&app).await["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("{PREFIX}/connections/{id}/remote-description"),
        Some(json!({"sdp": "v=0"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn complete_for_unknown_session_is_a_client_error() {
    let (server, _engine) = server();
    let app = server.router();

    let id = SessionId::new();
    let (status, _) = call(
        &app,
        Method::POST,
        &format!("{PREFIX}/connections/{id}/remote-description"),
        Some(json!({"type": "answer", "sdp": "v=0"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("{PREFIX}/connections/not-an-id/remote-description"),
        Some(json!({"type": "answer", "sdp": "v=0"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn candidate_poll_for_unregistered_id_is_a_client_error() {
    let (server, _engine) = server();
    let app = server.router();

    let id = SessionId::new();
    let (status, body) = call(
        &app,
        Method::GET,
        &format!("{PREFIX}/connections/{id}/additional-candidates"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_ne!(body, b"[]");
}

#[tokio::test]
async fn candidate_poll_returns_everything_gathered() {
    let (server, engine) = server();
    let app = server.router();
    let id = begin(&app).await["id"].as_str().unwrap().to_string();
    let uri = format!("{PREFIX}/connections/{id}/additional-candidates");

    let (status, body) = call(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!([]));

    engine.last_session().candidate("candidate:1 1 udp 1 10.0.0.1 9208 typ host");
    let session_id: SessionId = id.parse().unwrap();
    eventually("candidate", || {
        server
            .peer(session_id)
            .is_some_and(|p| p.candidates().len() == 1)
    })
    .await;

    let (_, body) = call(&app, Method::GET, &uri, None).await;
    let list: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(list[0]["candidate"], "candidate:1 1 udp 1 10.0.0.1 9208 typ host");
    assert_eq!(list[0]["sdpMid"], "0");
    assert_eq!(list[0]["sdpMLineIndex"], 0);

    // Polling again returns the same accumulated list.
    let (_, again) = call(&app, Method::GET, &uri, None).await;
    assert_eq!(serde_json::from_slice::<Value>(&again).unwrap(), list);
}

#[tokio::test]
async fn begin_fails_when_no_offer_can_be_made() {
    let (server, engine) = server();
    engine.fail_offers();
    let app = server.router();

    let (status, _) = call(&app, Method::POST, &format!("{PREFIX}/connections"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(server.state().is_empty());
}

#[tokio::test]
async fn routes_outside_the_prefix_are_not_found() {
    let (server, _engine) = server();
    let app = server.router();

    let (status, _) = call(&app, Method::POST, "/connections", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::GET, &format!("{PREFIX}/nothing-here"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_prefix_serves_at_the_root() {
    let config = ServerConfig {
        route_prefix: String::new(),
        ..Default::default()
    };
    let (server, _engine) = server_with(config);
    let app = server.router();

    let (status, _) = call(&app, Method::POST, "/connections", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn cors_allows_the_configured_origin() {
    let config = ServerConfig {
        cors: CorsConfig {
            origin: "https://game.example".to_string(),
            allow_authorization: true,
        },
        ..Default::default()
    };
    let (server, _engine) = server_with(config);
    let app = server.router();

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri(format!("{PREFIX}/connections"))
        .header(header::ORIGIN, "https://game.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    let headers = response.headers();
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://game.example"
    );
    let allowed = headers[header::ACCESS_CONTROL_ALLOW_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed.contains("authorization"));
}
