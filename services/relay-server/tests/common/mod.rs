//! Shared black-box test harness: spins up a real relay server bound to an
//! ephemeral port and drives it through real WebSocket connections, the way
//! `forwarder_ingest.rs`/`receiver_subscribe.rs` drive the teacher's server.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relay_core::RelayConfig;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Starts an in-process relay server with a short ping interval and
/// connection timeout so liveness-related tests don't need to wait out the
/// production defaults. Returns the bound address.
pub async fn start_server() -> SocketAddr {
    start_server_with_config(RelayConfig {
        ping_interval: Duration::from_secs(300),
        connection_timeout: Duration::from_secs(300),
        ..RelayConfig::default()
    })
    .await
}

pub async fn start_server_with_config(relay: RelayConfig) -> SocketAddr {
    let core = relay_core::RelayCore::new(relay);
    let _liveness = core.spawn_liveness();
    let router = relay_server::build_router(core);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test server");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server error");
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    addr
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A thin JSON-over-WebSocket client for driving the relay's wire protocol
/// directly, mirroring `rt_test_utils::MockWsClient` but carrying untyped
/// `serde_json::Value` frames since the relay's envelopes are not a closed
/// Rust type on the wire.
pub struct TestPeer {
    stream: WsStream,
}

impl TestPeer {
    pub async fn connect_device(addr: SocketAddr, device_id: &str) -> Self {
        Self::connect(addr, "device", device_id).await
    }

    pub async fn connect_client(addr: SocketAddr, client_id: &str) -> Self {
        Self::connect(addr, "client", client_id).await
    }

    async fn connect(addr: SocketAddr, role: &str, id: &str) -> Self {
        let url = format!("ws://{addr}/ws/{role}/{id}");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .expect("failed to connect test peer");
        Self { stream }
    }

    pub async fn send(&mut self, msg: Value) {
        let text = serde_json::to_string(&msg).unwrap();
        self.stream.send(Message::Text(text.into())).await.unwrap();
    }

    /// Receives the next frame, skipping any `ping` the liveness monitor
    /// might interleave (tests set a long ping interval, but this keeps
    /// intent explicit rather than relying on timing).
    pub async fn recv(&mut self) -> Value {
        loop {
            match self.stream.next().await.expect("stream ended unexpectedly").unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    /// Receives frames until `predicate` matches one, discarding the rest.
    /// Used where the relay's own `devices_list`/`ping` traffic can
    /// interleave with the message under test.
    pub async fn recv_matching(&mut self, predicate: impl Fn(&Value) -> bool) -> Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let msg = self.recv().await;
                if predicate(&msg) {
                    return msg;
                }
            }
        })
        .await
        .expect("timed out waiting for matching message")
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
