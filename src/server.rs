//! HTTP side: the `/api/v1/ws` endpoint plus optional static files.
//!
//! Every WebSocket session subscribes to the [`DeviceHub`], receives the
//! current device status right away, and then gets status changes and
//! samples as they happen. Inbound frames are read only to notice the
//! peer going away.

use std::path::Path;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::hub::{DeviceEvent, DeviceHub};
use crate::message::WsMessage;

/// Unexpected condition (RFC 6455).
const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Service restart (RFC 6455).
const CLOSE_SERVICE_RESTART: u16 = 1012;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<DeviceHub>,
}

pub fn router(hub: Arc<DeviceHub>, cors_origins: &[String], static_dir: Option<&Path>) -> Router {
    let api = Router::new().route("/ws", get(ws_handler));
    let mut app = Router::new()
        .nest("/api/v1", api)
        .with_state(AppState { hub });

    if let Some(dir) = static_dir.filter(|dir| dir.is_dir()) {
        tracing::info!(dir = %dir.display(), "Serving static files");
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(build_cors_layer(cors_origins))
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Map a device event to what dashboard clients see, if anything.
pub fn to_message(event: &DeviceEvent) -> Option<WsMessage> {
    match event {
        DeviceEvent::Prepared => Some(WsMessage::Status { connected: true }),
        DeviceEvent::ConnectionLost => Some(WsMessage::Status { connected: false }),
        DeviceEvent::Data { rate, t } => Some(WsMessage::Sample {
            t: *t,
            r: rate.bpm(),
            s: rate.sensor_contact(),
        }),
        _ => None,
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

type WsSink = SplitSink<WebSocket, Message>;

async fn send_message(sink: &mut WsSink, msg: &WsMessage) -> Result<(), axum::Error> {
    let text = msg.encode().map_err(axum::Error::new)?;
    sink.send(Message::Text(text.into())).await
}

async fn close(sink: &mut WsSink, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}

async fn handle_socket(socket: WebSocket, hub: Arc<DeviceHub>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();

    if !hub.started() {
        tracing::warn!(conn_id = %conn_id, "Rejecting WebSocket, device connection not started");
        close(&mut sink, CLOSE_INTERNAL_ERROR, "Connection not started").await;
        return;
    }

    tracing::info!(conn_id = %conn_id, "WebSocket connected");
    let mut events = hub.subscribe();
    let status = WsMessage::Status {
        connected: hub.connected(),
    };
    if send_message(&mut sink, &status).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(DeviceEvent::ShuttingDown) => {
                    close(&mut sink, CLOSE_SERVICE_RESTART, "Device connection shutting down").await;
                    break;
                }
                Ok(event) => {
                    let Some(msg) = to_message(&event) else {
                        continue;
                    };
                    if send_message(&mut sink, &msg).await.is_err() {
                        tracing::debug!(conn_id = %conn_id, "WebSocket sink closed");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(conn_id = %conn_id, skipped, "WebSocket client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}
