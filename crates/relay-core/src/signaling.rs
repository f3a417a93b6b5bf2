//! WebRTC signaling relay: validation, direction-aware identity rewriting,
//! auto-pair on signal, and session-row tracking.
//!
//! The relay never inspects SDP/ICE payloads beyond the fields it is told
//! about — it only rewrites envelope identity and decides where a message
//! goes.

use std::collections::HashMap;

use relay_protocol::{envelope, Envelope, OutboundMessage};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::registry::Registry;

struct SessionRow {
    client_id: String,
    device_id: String,
}

/// Owns the active WebRTC session table. Session rows are created on
/// `offer` and torn down only by an explicit [`SignalingRelay::close_session`]
/// call (available to callers, not wired into the default dispatch — the
/// source never calls it from `main.py` either).
pub struct SignalingRelay {
    sessions: tokio::sync::RwLock<HashMap<String, SessionRow>>,
}

impl Default for SignalingRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self {
            sessions: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Handles a `webrtc` message originated by a device. Invalid envelopes
    /// and messages from devices with no paired client are logged and
    /// dropped — the device has no pipeline-local destination to notify.
    pub async fn handle_device_message(&self, registry: &Registry, device_id: &str, mut env: Envelope, now_millis: i64) {
        if !envelope::is_valid_webrtc(&env) {
            warn!(device_id, "invalid WebRTC message format from device");
            return;
        }

        let Some(client_id) = registry.paired_client_for_device(device_id).await else {
            warn!(device_id, "device sent WebRTC message but has no paired client");
            return;
        };

        debug!(device_id, client_id = %client_id, subtype = env.str_field("subtype"), "relaying device webrtc message");

        if !env.has_field("sequence") {
            env.insert("sequence", Value::from(now_millis));
        }
        env.remove("device_id");
        env.insert("boatId", Value::String(device_id.to_owned()));

        registry.send_to_client(&client_id, &env.into_value()).await;
    }

    /// Handles a `webrtc` message originated by a client, targeting
    /// `target_device_id` (from the URL-level `deviceId`, subject to
    /// override by an envelope `boatId`).
    pub async fn handle_client_message(
        &self,
        registry: &Registry,
        client_id: &str,
        target_device_id: &str,
        mut env: Envelope,
        ice_servers: &Value,
        now_millis: i64,
    ) {
        if !envelope::is_valid_webrtc(&env) {
            warn!(client_id, "invalid WebRTC message format from client");
            registry
                .send_to_client(
                    client_id,
                    &OutboundMessage::Error {
                        message: "Invalid WebRTC message format".to_owned(),
                        command_id: None,
                    },
                )
                .await;
            return;
        }

        let target_device_id = match env.str_field("boatId") {
            Some(boat_id) if boat_id != target_device_id => boat_id.to_owned(),
            _ => {
                env.insert("boatId", Value::String(target_device_id.to_owned()));
                target_device_id.to_owned()
            }
        };

        if !registry.is_paired(&target_device_id, client_id).await {
            warn!(client_id, device_id = %target_device_id, "client sent WebRTC message to unpaired device");

            if registry.device_connected(&target_device_id).await {
                if !registry.pair(&target_device_id, client_id).await {
                    registry
                        .send_to_client(
                            client_id,
                            &OutboundMessage::Error {
                                message: format!("Cannot connect to device {target_device_id}"),
                                command_id: None,
                            },
                        )
                        .await;
                    return;
                }
            } else {
                registry
                    .send_to_client(
                        client_id,
                        &OutboundMessage::Error {
                            message: format!("Device {target_device_id} is not available"),
                            command_id: None,
                        },
                    )
                    .await;
                return;
            }
        }

        let subtype = env.str_field("subtype").map(str::to_owned);
        debug!(client_id, device_id = %target_device_id, subtype, "relaying client webrtc message");

        if !env.has_field("sequence") {
            env.insert("sequence", Value::from(now_millis));
        }

        if subtype.as_deref() == Some("offer") {
            let session_id = format!("{client_id}-{target_device_id}-{now_millis}");
            self.sessions.write().await.insert(
                session_id.clone(),
                SessionRow {
                    client_id: client_id.to_owned(),
                    device_id: target_device_id.clone(),
                },
            );
            env.insert("sessionId", Value::String(session_id));
            if !env.has_field("iceServers") {
                env.insert("iceServers", ice_servers.clone());
            }
        }

        registry.send_to_device(&target_device_id, &env.into_value()).await;
    }

    /// Sends a `webrtc`/`close` notice to both session participants and
    /// removes the session row.
    pub async fn close_session(&self, registry: &Registry, session_id: &str) {
        let session = self.sessions.write().await.remove(session_id);
        let Some(session) = session else {
            return;
        };
        let message = serde_json::json!({
            "type": "webrtc",
            "subtype": "close",
            "sessionId": session_id,
            "boatId": session.device_id,
        });
        registry.send_to_client(&session.client_id, &message).await;
        registry.send_to_device(&session.device_id, &message).await;
        info!(session_id, client_id = %session.client_id, device_id = %session.device_id, "closed WebRTC session");
    }
}
