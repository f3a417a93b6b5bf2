//! Tunables shared by the Registry, Liveness Monitor, Telemetry Pipeline,
//! and Signaling Relay. The server binary loads these from the process
//! environment (see `relay-server::config`); the core only knows the
//! resulting numbers.

use serde_json::Value;
use std::time::Duration;

/// Command-ack timeout (§6): fixed, not operator-configurable.
pub const COMMAND_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Command history cap per device (§6): fixed, not operator-configurable.
pub const COMMAND_HISTORY_CAP: usize = 100;

/// Idle-sweep period (§4.2): fixed, not operator-configurable.
pub const IDLE_SWEEP_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub ping_interval: Duration,
    pub connection_timeout: Duration,
    pub telemetry_buffer_size: usize,
    pub ice_servers: Value,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            connection_timeout: Duration::from_secs(30),
            telemetry_buffer_size: 100,
            ice_servers: default_ice_servers(),
        }
    }
}

pub fn default_ice_servers() -> Value {
    serde_json::json!([{ "urls": ["stun:stun.l.google.com:19302"] }])
}
