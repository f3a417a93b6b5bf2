//! Validation, sequence-gap detection, clock-offset tracking, bounded
//! buffering, and fan-out for device-originated telemetry.

use std::collections::{HashMap, VecDeque};

use relay_protocol::{envelope, Envelope, OutboundMessage};
use serde_json::Value;
use tracing::warn;

use crate::registry::Registry;

struct DeviceTelemetryState {
    buffer: VecDeque<Value>,
    sequence_tracker: HashMap<String, u64>,
    time_offset_ms: Option<i64>,
}

impl DeviceTelemetryState {
    fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            sequence_tracker: HashMap::new(),
            time_offset_ms: None,
        }
    }
}

/// Owns per-device telemetry buffers, sequence trackers, and clock offsets.
/// Mutual exclusion is a single lock over the whole table (§5): telemetry
/// throughput from one device never needs to block on another's.
pub struct TelemetryPipeline {
    buffer_cap: usize,
    devices: tokio::sync::RwLock<HashMap<String, DeviceTelemetryState>>,
}

impl TelemetryPipeline {
    pub fn new(buffer_cap: usize) -> Self {
        Self {
            buffer_cap,
            devices: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Processes one already-decoded device message. Callers must have
    /// already applied the legacy-format shim (see `envelope::looks_like_legacy_telemetry`)
    /// so that `env` is type-tagged by the time it reaches here.
    pub async fn process(&self, registry: &Registry, device_id: &str, env: Envelope, now_millis: i64) {
        if !envelope::is_valid_telemetry(&env) {
            warn!(device_id, "invalid telemetry format");
            registry
                .send_to_device(
                    device_id,
                    &OutboundMessage::Error {
                        message: "Invalid telemetry format".to_owned(),
                        command_id: None,
                    },
                )
                .await;
            return;
        }

        let mut env = env;
        let subtype = env.str_field("subtype").unwrap_or("unknown").to_owned();
        let sequence = env.u64_field("sequence").unwrap_or(0);
        let system_time = env.i64_field("system_time");

        let annotated = {
            let mut devices = self.devices.write().await;
            let state = devices
                .entry(device_id.to_owned())
                .or_insert_with(DeviceTelemetryState::new);

            if let Some(previous) = state.sequence_tracker.get(&subtype) {
                let expected = previous + 1;
                if sequence > expected {
                    let gap = sequence - expected;
                    warn!(device_id, subtype = %subtype, gap, "telemetry sequence gap");
                    let mut meta = env
                        .object_field("_meta")
                        .cloned()
                        .unwrap_or_default();
                    meta.insert("sequence_gap".to_owned(), Value::from(gap));
                    env.insert("_meta", Value::Object(meta));
                }
            }
            state.sequence_tracker.insert(subtype, sequence);

            if let Some(device_time) = system_time {
                let offset = now_millis - device_time;
                state.time_offset_ms = Some(offset);
                env.insert("synchronized_timestamp", Value::from(env.i64_field("timestamp").unwrap_or(0) + offset));
            }

            if state.buffer.len() == self.buffer_cap {
                state.buffer.pop_front();
            }
            state.buffer.push_back(env.as_value());

            env
        };

        let paired_client = registry.paired_client_for_device(device_id).await;
        let Some(client_id) = paired_client else {
            return;
        };
        if !registry.client_connected(&client_id).await {
            return;
        }

        let mut outgoing = annotated;
        outgoing.remove("device_id");
        outgoing.insert("boatId", Value::String(device_id.to_owned()));
        registry.send_to_client(&client_id, &outgoing.into_value()).await;
    }

    /// Returns the most recent `limit` buffered entries for a device,
    /// oldest-first within that window (matching the buffer's arrival
    /// order). Never mutates the buffer.
    pub async fn recent(&self, device_id: &str, limit: usize) -> Vec<Value> {
        let devices = self.devices.read().await;
        let Some(state) = devices.get(device_id) else {
            return Vec::new();
        };
        let len = state.buffer.len();
        let skip = len.saturating_sub(limit);
        state.buffer.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_channel::PeerChannel;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct CapturingChannel {
        received: Mutex<Vec<Value>>,
        sends: AtomicUsize,
    }

    impl PeerChannel for CapturingChannel {
        fn send_text(&self, payload: String) -> BoxFuture<'static, bool> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            self.received.lock().unwrap().push(serde_json::from_str(&payload).unwrap());
            Box::pin(async { true })
        }

        fn close(&self) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    fn telemetry(seq: u64) -> Envelope {
        Envelope::parse(&format!(
            r#"{{"type":"telemetry","subtype":"sensor_data","sequence":{seq},"timestamp":1000,"data":{{"gps":{{"latitude":1.0,"longitude":2.0}}}}}}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn forwards_to_paired_client_with_boat_id_stamped() {
        let registry = Registry::new();
        let client_channel: Arc<CapturingChannel> = Arc::new(CapturingChannel::default());
        registry.accept_device("d1", Arc::new(CapturingChannel::default())).await;
        registry.accept_client("c1", client_channel.clone()).await;
        registry.pair("d1", "c1").await;

        let pipeline = TelemetryPipeline::new(100);
        pipeline.process(&registry, "d1", telemetry(1), 1000).await;

        let received = client_channel.received.lock().unwrap();
        let forwarded = received.last().unwrap();
        assert_eq!(forwarded["boatId"], "d1");
        assert!(forwarded.get("device_id").is_none());
        assert!(forwarded.get("_meta").is_none());
    }

    #[tokio::test]
    async fn sequence_gap_is_annotated_and_tracker_holds_last_seen() {
        let registry = Registry::new();
        let client_channel: Arc<CapturingChannel> = Arc::new(CapturingChannel::default());
        registry.accept_device("d1", Arc::new(CapturingChannel::default())).await;
        registry.accept_client("c1", client_channel.clone()).await;
        registry.pair("d1", "c1").await;

        let pipeline = TelemetryPipeline::new(100);
        pipeline.process(&registry, "d1", telemetry(1), 1000).await;
        pipeline.process(&registry, "d1", telemetry(5), 1000).await;

        let received = client_channel.received.lock().unwrap();
        let gapped = &received[1];
        assert_eq!(gapped["_meta"]["sequence_gap"], 3);
    }

    #[tokio::test]
    async fn unpaired_device_still_buffers_without_forwarding() {
        let registry = Registry::new();
        registry.accept_device("d1", Arc::new(CapturingChannel::default())).await;

        let pipeline = TelemetryPipeline::new(100);
        pipeline.process(&registry, "d1", telemetry(1), 1000).await;

        let recent = pipeline.recent("d1", 10).await;
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn buffer_evicts_oldest_past_cap() {
        let registry = Registry::new();
        registry.accept_device("d1", Arc::new(CapturingChannel::default())).await;

        let pipeline = TelemetryPipeline::new(2);
        pipeline.process(&registry, "d1", telemetry(1), 1000).await;
        pipeline.process(&registry, "d1", telemetry(2), 1000).await;
        pipeline.process(&registry, "d1", telemetry(3), 1000).await;

        let recent = pipeline.recent("d1", 10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0]["sequence"], 2);
        assert_eq!(recent[1]["sequence"], 3);
    }

    #[tokio::test]
    async fn invalid_telemetry_replies_with_error_and_is_not_buffered() {
        let registry = Registry::new();
        registry.accept_device("d1", Arc::new(CapturingChannel::default())).await;

        let pipeline = TelemetryPipeline::new(100);
        let bad = Envelope::parse(r#"{"type":"telemetry","subtype":"sensor_data"}"#).unwrap();
        pipeline.process(&registry, "d1", bad, 1000).await;

        assert!(pipeline.recent("d1", 10).await.is_empty());
    }
}
