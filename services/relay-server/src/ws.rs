//! The two WebSocket endpoints: `/ws/device/{device_id}` and
//! `/ws/client/{client_id}`. Each accepted connection gets its own
//! read-loop task that dispatches into [`RelayCore`] and an
//! [`AxumPeerChannel`] the core uses to push messages back out.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::future::BoxFuture;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use relay_core::{PeerChannel, RelayCore};
use relay_protocol::Envelope;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A `PeerChannel` backed by one half of an axum `WebSocket`.
///
/// The sink is wrapped in `Arc<Mutex<_>>` rather than held by reference so
/// that `send_text`/`close` can return a `'static` future without borrowing
/// `self` — the Registry clones this type's `Arc<dyn PeerChannel>` handle
/// across pipelines that outlive any single call.
pub struct AxumPeerChannel {
    sink: Arc<Mutex<SplitSink<WebSocket, Message>>>,
}

impl AxumPeerChannel {
    fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }
}

impl PeerChannel for AxumPeerChannel {
    fn send_text(&self, payload: String) -> BoxFuture<'static, bool> {
        let sink = self.sink.clone();
        Box::pin(async move { sink.lock().await.send(Message::Text(payload)).await.is_ok() })
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        let sink = self.sink.clone();
        Box::pin(async move {
            let _ = sink.lock().await.close().await;
        })
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

pub async fn device_ws_handler(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    State(core): State<Arc<RelayCore>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_device_socket(socket, device_id, core))
}

async fn handle_device_socket(socket: WebSocket, device_id: String, core: Arc<RelayCore>) {
    let (sink, mut stream) = socket.split();
    let channel = Arc::new(AxumPeerChannel::new(sink));
    core.registry.accept_device(&device_id, channel).await;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match Envelope::parse(&text) {
                Some(env) => core.handle_device_message(&device_id, env, now_millis()).await,
                None => {
                    warn!(device_id, "malformed frame from device, closing connection");
                    break;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => {}
            Err(err) => {
                warn!(device_id, %err, "websocket error reading from device");
                break;
            }
        }
    }

    core.registry.mark_device_disconnected(&device_id).await;
    info!(device_id, "device connection closed");
}

pub async fn client_ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(core): State<Arc<RelayCore>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client_socket(socket, client_id, core))
}

async fn handle_client_socket(socket: WebSocket, client_id: String, core: Arc<RelayCore>) {
    let (sink, mut stream) = socket.split();
    let channel = Arc::new(AxumPeerChannel::new(sink));
    core.registry.accept_client(&client_id, channel).await;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match Envelope::parse(&text) {
                Some(env) => core.handle_client_message(&client_id, env, now_millis(), now_unix_secs()).await,
                None => {
                    warn!(client_id, "malformed frame from client, closing connection");
                    break;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => {}
            Err(err) => {
                warn!(client_id, %err, "websocket error reading from client");
                break;
            }
        }
    }

    core.registry.mark_client_disconnected(&client_id).await;
    info!(client_id, "client connection closed");
}
