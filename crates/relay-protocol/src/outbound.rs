//! Strongly-typed server-originated messages.
//!
//! Unlike inbound device/client traffic (see [`crate::envelope`]), every
//! message the relay itself emits has a frozen, fully-known shape, so these
//! are modeled as an ordinary tagged enum the way the teacher models its own
//! `WsMessage` wire type.

use serde::Serialize;

/// One entry in a `devices_list` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceListEntry {
    pub id: String,
    pub connected: bool,
    pub paired: bool,
}

/// All message kinds the relay sends to a device or client.
///
/// Serializes using the `type` field as a tag, per the wire catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Ping,
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        command_id: Option<String>,
    },
    DevicesList {
        devices: Vec<DeviceListEntry>,
    },
    ConnectionStatus {
        #[serde(rename = "deviceId")]
        device_id: String,
        status: ConnectionStatusKind,
    },
    DeviceConnected {
        #[serde(rename = "deviceId")]
        device_id: String,
        status: &'static str,
    },
    CommandStatus {
        command_id: String,
        status: String,
        message: String,
        /// Absent on the immediate "device unavailable" reply; present once
        /// an ack or timeout has actually occurred.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatusKind {
    Connected,
    Disconnected,
}

impl OutboundMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("OutboundMessage always serializes")
    }
}
