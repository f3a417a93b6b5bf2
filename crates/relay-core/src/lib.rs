//! The relay's central brokering subsystem: connection registry, pairing,
//! liveness, telemetry pipeline, command pipeline, and signaling relay.
//!
//! This crate has no transport opinion — it is driven by whatever hosts a
//! duplex channel per peer (see [`peer_channel::PeerChannel`]) and calls
//! into [`RelayCore::handle_device_message`] / [`RelayCore::handle_client_message`]
//! once per inbound frame.

pub mod command;
pub mod config;
mod dispatch;
pub mod liveness;
pub mod peer_channel;
pub mod registry;
pub mod signaling;
pub mod telemetry;

use std::sync::Arc;

pub use command::CommandPipeline;
pub use config::RelayConfig;
pub use liveness::LivenessMonitor;
pub use peer_channel::PeerChannel;
pub use registry::Registry;
pub use signaling::SignalingRelay;
pub use telemetry::TelemetryPipeline;

/// Owns every component of the relay and exposes the two dispatch entry
/// points a transport layer drives.
pub struct RelayCore {
    pub registry: Arc<Registry>,
    pub telemetry: Arc<TelemetryPipeline>,
    pub command: Arc<CommandPipeline>,
    pub signaling: Arc<SignalingRelay>,
    config: RelayConfig,
}

impl RelayCore {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(Registry::new()),
            telemetry: Arc::new(TelemetryPipeline::new(config.telemetry_buffer_size)),
            command: Arc::new(CommandPipeline::new()),
            signaling: Arc::new(SignalingRelay::new()),
            config,
        })
    }

    /// Spawns the liveness monitor's two background loops against this
    /// core's registry. The caller owns the returned handle and must call
    /// [`LivenessMonitor::shutdown`] during graceful shutdown.
    pub fn spawn_liveness(&self) -> LivenessMonitor {
        LivenessMonitor::spawn(self.registry.clone(), self.config.ping_interval, self.config.connection_timeout)
    }
}
