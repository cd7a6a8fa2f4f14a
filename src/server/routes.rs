//! Axum routes for the coordination hub.
//!
//! # Routes
//!
//! - `GET /health` — liveness probe, returns `{"status": "ok", ...}`
//! - `GET /agents` — snapshot of every registered agent record
//! - `GET /ws`     — WebSocket upgrade for the agent protocol
//!
//! Each WebSocket connection gets a bounded outbound channel drained by a
//! writer task; responses and notifications share that channel so frames
//! reach the agent in the order the hub produced them.

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use tower_http::cors::CorsLayer;

use crate::config::HubConfig;
use crate::errors::HubError;
use crate::hub::Coordinator;
use crate::transport::{ConnectionSink, MpscSink};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Coordinator>,
}

impl AppState {
    pub fn new(config: HubConfig) -> Self {
        Self {
            hub: Arc::new(Coordinator::new(config)),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/agents", get(agents_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health — liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "a2a-hub",
        "agents": state.hub.registry().len(),
    }))
}

/// GET /agents — every registered agent, offline records included.
async fn agents_handler(State(state): State<AppState>) -> impl IntoResponse {
    let agents = state.hub.registry().snapshot();
    Json(serde_json::json!({
        "agents": agents,
        "count": agents.len(),
    }))
}

/// GET /ws — upgrade to the agent WebSocket protocol.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state.hub, socket))
}

/// Drive one agent connection: a writer task drains the outbound channel
/// while the read loop feeds inbound frames to the hub. Closing the socket
/// (or any read error) runs disconnect cleanup exactly once.
async fn handle_socket(hub: Arc<Coordinator>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (sink, mut outbound_rx) = MpscSink::channel(hub.config().outbound_buffer);
    let sink: Arc<dyn ConnectionSink> = Arc::new(sink);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut bound: Option<String> = None;
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let response = hub.handle_frame(&sink, &mut bound, &text).await;
                if sink.send(response.to_string()).await.is_err() {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                let error = HubError::malformed("binary frames are not supported");
                if sink.send(error.to_frame().to_string()).await.is_err() {
                    break;
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) | Err(_) => break,
        }
    }

    if let Some(agent_id) = &bound {
        hub.handle_disconnect(agent_id).await;
    }
    // The hub no longer holds a sender; dropping ours lets the writer drain
    // any queued frames and exit.
    drop(sink);
    let _ = writer.await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::HashMap;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = app_router(AppState::default());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "a2a-hub");
        assert_eq!(body["version"], crate::VERSION);
    }

    #[tokio::test]
    async fn test_agents_endpoint_lists_registered() {
        let state = AppState::default();
        state
            .hub
            .registry()
            .register("a1", "builder", vec!["dig".into()], None, HashMap::new());
        state.hub.registry().register("a2", "monitor", vec![], None, HashMap::new());
        state.hub.registry().mark_offline("a2");

        let app = app_router(state);
        let response = app
            .oneshot(Request::builder().uri("/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        // Offline records are still listed; /agents is a full snapshot.
        assert_eq!(body["count"], 2);
        assert_eq!(body["agents"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = app_router(AppState::default());
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
