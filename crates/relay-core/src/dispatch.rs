//! Top-level message routing, mirroring the two WebSocket endpoints'
//! dispatch logic: device-originated messages and client-originated ones.

use relay_protocol::{envelope, Envelope, OutboundMessage};
use serde_json::Value;
use tracing::warn;

use crate::RelayCore;

impl RelayCore {
    /// Routes one already-decoded message from a device connection.
    ///
    /// Frames that fail to parse as a JSON object are a transport fault and
    /// must be handled by the caller (closing the connection), not here —
    /// by the time a message reaches dispatch it is a valid [`Envelope`].
    pub async fn handle_device_message(&self, device_id: &str, mut env: Envelope, now_millis: i64) {
        if env.message_type().is_none() {
            env = match Self::apply_legacy_telemetry_shim(env, now_millis) {
                Some(shimmed) => shimmed,
                None => {
                    warn!(device_id, "device sent message without valid type field");
                    return;
                }
            };
        }

        match env.message_type() {
            Some("webrtc") => {
                self.signaling.handle_device_message(&self.registry, device_id, env, now_millis).await;
            }
            Some("telemetry") => {
                self.telemetry.process(&self.registry, device_id, env, now_millis).await;
            }
            Some("pong") => {
                self.registry.note_device_activity(device_id).await;
            }
            Some("command_ack") => {
                self.command.handle_ack(&self.registry, &env, now_millis).await;
            }
            Some("status_response") => {
                self.handle_status_response(device_id, env).await;
            }
            other => {
                warn!(device_id, message_type = ?other, "unknown message type from device");
            }
        }
    }

    /// `{type: "status_response", ...}`: forwarded as-is to the paired
    /// client, with `deviceId` stamped if the device didn't supply one.
    /// Unpaired responses are logged and dropped.
    async fn handle_status_response(&self, device_id: &str, mut env: Envelope) {
        let Some(client_id) = self.registry.paired_client_for_device(device_id).await else {
            warn!(device_id, "received status response but no paired client");
            return;
        };
        if !env.has_field("deviceId") {
            env.insert("deviceId", Value::String(device_id.to_owned()));
        }
        self.registry.send_to_client(&client_id, &env.into_value()).await;
    }

    /// Applies the legacy GPS-encoder accommodation (§4.2): a `position`
    /// object, or bare `gps`/`location`/`coordinates`/`latitude`/`longitude`
    /// keys, on an otherwise type-less message. Returns `None` if the
    /// message doesn't match either shape.
    fn apply_legacy_telemetry_shim(env: Envelope, now_millis: i64) -> Option<Envelope> {
        if !envelope::looks_like_legacy_telemetry(&env) {
            return None;
        }
        if env.object_field("position").is_some() {
            Some(envelope::synthesize_legacy_position_telemetry(&env, now_millis))
        } else {
            Some(envelope::stamp_as_sensor_data(env))
        }
    }

    /// Routes one already-decoded message from a client connection.
    pub async fn handle_client_message(&self, client_id: &str, env: Envelope, now_millis: i64, now_unix_secs: i64) {
        let message_type = env.message_type().map(str::to_owned);

        if message_type.as_deref() == Some("devices_list") {
            self.registry.send_devices_list(client_id).await;
            return;
        }
        if message_type.as_deref() == Some("pong") {
            self.registry.note_client_activity(client_id).await;
            return;
        }

        let Some(target_device_id) = env.str_field("deviceId").map(str::to_owned) else {
            warn!(client_id, message_type = ?message_type, "client sent message without deviceId");
            self.registry
                .send_to_client(
                    client_id,
                    &OutboundMessage::Error {
                        message: format!(
                            "Missing deviceId for message type: {}",
                            message_type.as_deref().unwrap_or("None")
                        ),
                        command_id: None,
                    },
                )
                .await;
            return;
        };

        match message_type.as_deref() {
            Some("webrtc") => {
                self.signaling
                    .handle_client_message(&self.registry, client_id, &target_device_id, env, &self.config.ice_servers, now_millis)
                    .await;
            }
            Some("command") => {
                self.command
                    .submit(&self.registry, client_id, &target_device_id, env, now_unix_secs, now_millis)
                    .await;
            }
            Some("connect_device") => {
                self.handle_connect_device(client_id, &target_device_id).await;
            }
            other => {
                warn!(client_id, message_type = ?other, "unknown message type from client");
            }
        }
    }

    /// `{type: "connect_device", deviceId}`: explicit pair request.
    async fn handle_connect_device(&self, client_id: &str, target_device_id: &str) {
        if self.registry.pair(target_device_id, client_id).await {
            self.registry
                .send_to_client(
                    client_id,
                    &OutboundMessage::DeviceConnected {
                        device_id: target_device_id.to_owned(),
                        status: "connected",
                    },
                )
                .await;
        } else {
            warn!(client_id, device_id = target_device_id, "failed to connect client to device");
            self.registry
                .send_to_client(
                    client_id,
                    &OutboundMessage::Error {
                        message: format!("Failed to connect to device {target_device_id}"),
                        command_id: None,
                    },
                )
                .await;
        }
    }
}
