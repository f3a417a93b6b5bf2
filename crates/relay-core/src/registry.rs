//! The connection registry: membership tables, the pairing map, and the
//! send primitives every other component routes through.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use relay_protocol::{ConnectionStatusKind, DeviceListEntry, OutboundMessage};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::peer_channel::PeerChannel;

struct ConnectionEntry {
    channel: Arc<dyn PeerChannel>,
    last_activity: Instant,
    connected: bool,
}

impl ConnectionEntry {
    fn new(channel: Arc<dyn PeerChannel>) -> Self {
        Self {
            channel,
            last_activity: Instant::now(),
            connected: true,
        }
    }
}

/// Owns the device/client membership tables and the bidirectional pairing
/// map. Every cross-peer send goes through `send_to_device`/`send_to_client`
/// so that liveness bookkeeping (last-activity refresh, eviction on write
/// failure) stays centralized.
pub struct Registry {
    devices: RwLock<HashMap<String, ConnectionEntry>>,
    clients: RwLock<HashMap<String, ConnectionEntry>>,
    device_to_client: RwLock<HashMap<String, String>>,
    client_to_device: RwLock<HashMap<String, String>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            device_to_client: RwLock::new(HashMap::new()),
            client_to_device: RwLock::new(HashMap::new()),
        }
    }

    /// Accepts a device connection, evicting any prior live one for the same
    /// id and restoring pairing if the counterpart client is still known.
    pub async fn accept_device(&self, device_id: &str, channel: Arc<dyn PeerChannel>) {
        self.replace_entry(&self.devices, device_id, channel).await;
        info!(device_id, "device connected");

        let paired_client = self.device_to_client.read().await.get(device_id).cloned();
        if let Some(client_id) = paired_client {
            if self.client_connected(&client_id).await {
                info!(device_id, client_id = %client_id, "restored device-side pairing on reconnect");
                self.send_to_client(
                    &client_id,
                    &OutboundMessage::ConnectionStatus {
                        device_id: device_id.to_owned(),
                        status: ConnectionStatusKind::Connected,
                    },
                )
                .await;
            }
        }
    }

    /// Accepts a client connection, restoring pairing notice and always
    /// sending a fresh devices list.
    pub async fn accept_client(&self, client_id: &str, channel: Arc<dyn PeerChannel>) {
        self.replace_entry(&self.clients, client_id, channel).await;
        info!(client_id, "client connected");

        let paired_device = self.client_to_device.read().await.get(client_id).cloned();
        if let Some(device_id) = &paired_device {
            if self.device_connected(device_id).await {
                info!(client_id, device_id = %device_id, "restored client-side pairing on reconnect");
                self.send_to_client(
                    client_id,
                    &OutboundMessage::ConnectionStatus {
                        device_id: device_id.clone(),
                        status: ConnectionStatusKind::Connected,
                    },
                )
                .await;
            }
        }
        self.send_devices_list(client_id).await;
    }

    async fn replace_entry(
        &self,
        table: &RwLock<HashMap<String, ConnectionEntry>>,
        id: &str,
        channel: Arc<dyn PeerChannel>,
    ) {
        let old_channel = {
            let mut table = table.write().await;
            let old = table.insert(id.to_owned(), ConnectionEntry::new(channel));
            old.filter(|entry| entry.connected).map(|entry| entry.channel)
        };
        if let Some(old_channel) = old_channel {
            old_channel.close().await;
        }
    }

    pub async fn mark_device_disconnected(&self, device_id: &str) {
        let was_connected = Self::mark_disconnected(&self.devices, device_id).await;
        if !was_connected {
            return;
        }
        info!(device_id, "device disconnected");
        let paired_client = self.device_to_client.read().await.get(device_id).cloned();
        if let Some(client_id) = paired_client {
            self.send_to_client(
                &client_id,
                &OutboundMessage::ConnectionStatus {
                    device_id: device_id.to_owned(),
                    status: ConnectionStatusKind::Disconnected,
                },
            )
            .await;
        }
    }

    pub async fn mark_client_disconnected(&self, client_id: &str) {
        if Self::mark_disconnected(&self.clients, client_id).await {
            info!(client_id, "client disconnected");
        }
    }

    async fn mark_disconnected(table: &RwLock<HashMap<String, ConnectionEntry>>, id: &str) -> bool {
        let mut table = table.write().await;
        match table.get_mut(id) {
            Some(entry) if entry.connected => {
                entry.connected = false;
                true
            }
            _ => false,
        }
    }

    pub async fn device_connected(&self, device_id: &str) -> bool {
        self.devices
            .read()
            .await
            .get(device_id)
            .is_some_and(|entry| entry.connected)
    }

    pub async fn client_connected(&self, client_id: &str) -> bool {
        self.clients
            .read()
            .await
            .get(client_id)
            .is_some_and(|entry| entry.connected)
    }

    /// Pairs a device and client, succeeding only if both are connected.
    /// Idempotent for an already-matching pair; last-writer-wins when either
    /// side was previously paired elsewhere (§9 open question).
    pub async fn pair(&self, device_id: &str, client_id: &str) -> bool {
        if !self.device_connected(device_id).await || !self.client_connected(client_id).await {
            return false;
        }

        let mut device_to_client = self.device_to_client.write().await;
        let mut client_to_device = self.client_to_device.write().await;

        if device_to_client.get(device_id).map(String::as_str) == Some(client_id)
            && client_to_device.get(client_id).map(String::as_str) == Some(device_id)
        {
            return true;
        }

        if let Some(previous_client) = device_to_client.get(device_id) {
            if previous_client != client_id {
                client_to_device.remove(previous_client);
            }
        }
        if let Some(previous_device) = client_to_device.get(client_id) {
            if previous_device != device_id {
                device_to_client.remove(previous_device);
            }
        }

        device_to_client.insert(device_id.to_owned(), client_id.to_owned());
        client_to_device.insert(client_id.to_owned(), device_id.to_owned());
        info!(device_id, client_id, "paired");
        true
    }

    /// Removes the (device, client) pairing, only if it matches exactly.
    pub async fn unpair(&self, device_id: &str, client_id: &str) {
        let mut device_to_client = self.device_to_client.write().await;
        if device_to_client.get(device_id).map(String::as_str) != Some(client_id) {
            return;
        }
        device_to_client.remove(device_id);
        self.client_to_device.write().await.remove(client_id);
        info!(device_id, client_id, "unpaired");
    }

    pub async fn is_paired(&self, device_id: &str, client_id: &str) -> bool {
        self.client_to_device.read().await.get(client_id).map(String::as_str) == Some(device_id)
    }

    pub async fn paired_client_for_device(&self, device_id: &str) -> Option<String> {
        self.device_to_client.read().await.get(device_id).cloned()
    }

    pub async fn paired_device_for_client(&self, client_id: &str) -> Option<String> {
        self.client_to_device.read().await.get(client_id).cloned()
    }

    /// Serializes `payload` and writes it to the device's channel. Refreshes
    /// last-activity on success; evicts the device on failure.
    pub async fn send_to_device(&self, device_id: &str, payload: &impl Serialize) -> bool {
        self.send(&self.devices, device_id, payload).await
            || {
                self.mark_device_disconnected(device_id).await;
                false
            }
    }

    /// Serializes `payload` and writes it to the client's channel. Refreshes
    /// last-activity on success; evicts the client on failure.
    pub async fn send_to_client(&self, client_id: &str, payload: &impl Serialize) -> bool {
        self.send(&self.clients, client_id, payload).await
            || {
                self.mark_client_disconnected(client_id).await;
                false
            }
    }

    async fn send(
        &self,
        table: &RwLock<HashMap<String, ConnectionEntry>>,
        id: &str,
        payload: &impl Serialize,
    ) -> bool {
        let channel = {
            let table = table.read().await;
            match table.get(id) {
                Some(entry) if entry.connected => entry.channel.clone(),
                _ => return false,
            }
        };
        let Ok(text) = serde_json::to_string(payload) else {
            warn!(id, "failed to serialize outbound payload");
            return false;
        };
        if !channel.send_text(text).await {
            return false;
        }
        if let Some(entry) = table.write().await.get_mut(id) {
            entry.last_activity = Instant::now();
        }
        true
    }

    pub async fn send_devices_list(&self, client_id: &str) {
        let devices = self.devices.read().await;
        let device_to_client = self.device_to_client.read().await;
        let entries: Vec<DeviceListEntry> = devices
            .iter()
            .map(|(id, entry)| DeviceListEntry {
                id: id.clone(),
                connected: entry.connected,
                paired: device_to_client.get(id).map(String::as_str) == Some(client_id),
            })
            .collect();
        drop(devices);
        drop(device_to_client);
        self.send_to_client(client_id, &OutboundMessage::DevicesList { devices: entries })
            .await;
    }

    pub async fn note_device_activity(&self, device_id: &str) {
        if let Some(entry) = self.devices.write().await.get_mut(device_id) {
            entry.last_activity = Instant::now();
        }
    }

    pub async fn note_client_activity(&self, client_id: &str) {
        if let Some(entry) = self.clients.write().await.get_mut(client_id) {
            entry.last_activity = Instant::now();
        }
    }

    /// Sends `{"type": "ping"}` to every connected peer, evicting any whose
    /// send fails. Used by the Liveness Monitor's ping loop.
    pub async fn ping_all_connected(&self) {
        let device_ids: Vec<String> = self
            .devices
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.connected)
            .map(|(id, _)| id.clone())
            .collect();
        for device_id in device_ids {
            self.send_to_device(&device_id, &OutboundMessage::Ping).await;
        }

        let client_ids: Vec<String> = self
            .clients
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.connected)
            .map(|(id, _)| id.clone())
            .collect();
        for client_id in client_ids {
            self.send_to_client(&client_id, &OutboundMessage::Ping).await;
        }
    }

    /// Marks every connected peer idle past `timeout` as disconnected. Used
    /// by the Liveness Monitor's idle sweep.
    pub async fn sweep_idle(&self, timeout: std::time::Duration) {
        let now = Instant::now();
        let stale_devices: Vec<String> = self
            .devices
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.connected && now.duration_since(entry.last_activity) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for device_id in stale_devices {
            warn!(device_id, "device connection timed out");
            self.mark_device_disconnected(&device_id).await;
        }

        let stale_clients: Vec<String> = self
            .clients
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.connected && now.duration_since(entry.last_activity) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for client_id in stale_clients {
            warn!(client_id, "client connection timed out");
            self.mark_client_disconnected(&client_id).await;
        }
    }

    pub async fn connection_counts(&self) -> (usize, usize) {
        let devices = self.devices.read().await.values().filter(|e| e.connected).count();
        let clients = self.clients.read().await.values().filter(|e| e.connected).count();
        (devices, clients)
    }

    /// Closes every tracked channel and clears all tables. Only used during
    /// process shutdown.
    pub async fn close_all(&self) {
        info!("closing all connections");
        let mut devices = self.devices.write().await;
        for entry in devices.values() {
            entry.channel.close().await;
        }
        devices.clear();

        let mut clients = self.clients.write().await;
        for entry in clients.values() {
            entry.channel.close().await;
        }
        clients.clear();

        self.device_to_client.write().await.clear();
        self.client_to_device.write().await.clear();
        info!("all connections closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingChannel {
        closed: AtomicBool,
        sends: AtomicUsize,
        fail_next: AtomicBool,
    }

    impl PeerChannel for RecordingChannel {
        fn send_text(&self, _payload: String) -> BoxFuture<'static, bool> {
            let failed = self.fail_next.swap(false, Ordering::SeqCst);
            self.sends.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { !failed })
        }

        fn close(&self) -> BoxFuture<'static, ()> {
            self.closed.store(true, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn channel() -> Arc<RecordingChannel> {
        Arc::new(RecordingChannel::default())
    }

    #[tokio::test]
    async fn pair_requires_both_sides_connected() {
        let registry = Registry::new();
        assert!(!registry.pair("d1", "c1").await);

        registry.accept_device("d1", channel()).await;
        assert!(!registry.pair("d1", "c1").await);

        registry.accept_client("c1", channel()).await;
        assert!(registry.pair("d1", "c1").await);
        assert!(registry.is_paired("d1", "c1").await);
    }

    #[tokio::test]
    async fn pair_is_idempotent() {
        let registry = Registry::new();
        registry.accept_device("d1", channel()).await;
        registry.accept_client("c1", channel()).await;
        assert!(registry.pair("d1", "c1").await);
        assert!(registry.pair("d1", "c1").await);
        assert_eq!(registry.paired_client_for_device("d1").await, Some("c1".to_owned()));
    }

    #[tokio::test]
    async fn pair_last_writer_wins_on_rebind() {
        let registry = Registry::new();
        registry.accept_device("d1", channel()).await;
        registry.accept_client("c1", channel()).await;
        registry.accept_client("c2", channel()).await;

        assert!(registry.pair("d1", "c1").await);
        assert!(registry.pair("d1", "c2").await);

        assert!(!registry.is_paired("d1", "c1").await);
        assert!(registry.is_paired("d1", "c2").await);
        assert_eq!(registry.paired_device_for_client("c1").await, None);
    }

    #[tokio::test]
    async fn unpair_only_removes_matching_pair() {
        let registry = Registry::new();
        registry.accept_device("d1", channel()).await;
        registry.accept_client("c1", channel()).await;
        registry.pair("d1", "c1").await;

        registry.unpair("d1", "c2").await;
        assert!(registry.is_paired("d1", "c1").await);

        registry.unpair("d1", "c1").await;
        assert!(!registry.is_paired("d1", "c1").await);
    }

    #[tokio::test]
    async fn reaccepting_device_closes_prior_channel_and_restores_pairing() {
        let registry = Registry::new();
        let first = channel();
        registry.accept_device("d1", first.clone()).await;
        registry.accept_client("c1", channel()).await;
        registry.pair("d1", "c1").await;

        registry.mark_device_disconnected("d1").await;
        let second = channel();
        registry.accept_device("d1", second).await;

        assert!(registry.is_paired("d1", "c1").await);
    }

    #[tokio::test]
    async fn send_failure_evicts_target() {
        let registry = Registry::new();
        let ch = channel();
        ch.fail_next.store(true, Ordering::SeqCst);
        registry.accept_device("d1", ch).await;

        assert!(!registry.send_to_device("d1", &serde_json::json!({"type": "ping"})).await);
        assert!(!registry.device_connected("d1").await);
    }

    #[tokio::test]
    async fn devices_list_marks_paired_flag_for_requesting_client_only() {
        let registry = Registry::new();
        registry.accept_device("d1", channel()).await;
        registry.accept_client("c1", channel()).await;
        registry.accept_client("c2", channel()).await;
        registry.pair("d1", "c1").await;

        assert!(registry.is_paired("d1", "c1").await);
        assert!(!registry.is_paired("d1", "c2").await);
    }

    #[tokio::test]
    async fn sweep_idle_evicts_past_timeout_connections() {
        let registry = Registry::new();
        registry.accept_device("d1", channel()).await;
        if let Some(entry) = registry.devices.write().await.get_mut("d1") {
            entry.last_activity = Instant::now() - std::time::Duration::from_secs(60);
        }
        registry.sweep_idle(std::time::Duration::from_secs(30)).await;
        assert!(!registry.device_connected("d1").await);
    }
}
