//! Annotation, history, pending-ack tracking, and timeout expiry for
//! client-originated commands.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use relay_protocol::{Envelope, OutboundMessage};
use serde_json::Value;
use tracing::warn;

use crate::config::{COMMAND_ACK_TIMEOUT, COMMAND_HISTORY_CAP};
use crate::registry::Registry;

struct PendingCommand {
    client_id: String,
    status: String,
}

/// Owns per-device command sequences, bounded history, and the pending-ack
/// table. Timeout tasks are spawned per command and hold an `Arc` back to
/// both this pipeline and the `Registry`, so the pipeline itself must be
/// constructed behind an `Arc`.
pub struct CommandPipeline {
    sequences: tokio::sync::RwLock<HashMap<String, u64>>,
    history: tokio::sync::RwLock<HashMap<String, VecDeque<Value>>>,
    pending: tokio::sync::RwLock<HashMap<String, PendingCommand>>,
}

impl Default for CommandPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandPipeline {
    pub fn new() -> Self {
        Self {
            sequences: tokio::sync::RwLock::new(HashMap::new()),
            history: tokio::sync::RwLock::new(HashMap::new()),
            pending: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Submits a command from `client_id` targeting `device_id`. Caller must
    /// already have confirmed `env.message_type() == Some("command")`.
    pub async fn submit(
        self: &Arc<Self>,
        registry: &Arc<Registry>,
        client_id: &str,
        device_id: &str,
        mut env: Envelope,
        now_unix_secs: i64,
        now_millis: i64,
    ) {
        if !registry.is_paired(device_id, client_id).await {
            warn!(client_id, device_id, "command sent to unpaired device");
            registry
                .send_to_client(
                    client_id,
                    &OutboundMessage::Error {
                        message: format!("Not paired with device {device_id}"),
                        command_id: env.str_field("command_id").map(str::to_owned),
                    },
                )
                .await;
            return;
        }

        let sequence = {
            let mut sequences = self.sequences.write().await;
            let next = sequences.get(device_id).copied().unwrap_or(0) + 1;
            sequences.insert(device_id.to_owned(), next);
            next
        };

        let command_id = env
            .str_field("command_id")
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{device_id}-{sequence}-{now_unix_secs}"));
        env.insert("command_id", Value::String(command_id.clone()));
        env.insert("server_timestamp", Value::from(now_millis));
        env.insert("sequence", Value::from(sequence));
        env.insert("client_id", Value::String(client_id.to_owned()));

        {
            let mut history = self.history.write().await;
            let bucket = history.entry(device_id.to_owned()).or_default();
            if bucket.len() == COMMAND_HISTORY_CAP {
                bucket.pop_front();
            }
            bucket.push_back(env.as_value());
        }

        let sent = registry.send_to_device(device_id, &env.as_value()).await;
        if !sent {
            registry
                .send_to_client(
                    client_id,
                    &OutboundMessage::CommandStatus {
                        command_id,
                        status: "failed".to_owned(),
                        message: "Device unavailable".to_owned(),
                        timestamp: None,
                    },
                )
                .await;
            return;
        }

        self.pending.write().await.insert(
            command_id.clone(),
            PendingCommand {
                client_id: client_id.to_owned(),
                status: "pending".to_owned(),
            },
        );

        let pipeline = self.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(COMMAND_ACK_TIMEOUT).await;
            pipeline.expire(&registry, &command_id).await;
        });
    }

    /// Handles a `command_ack` from a device, relaying the status to the
    /// waiting client and clearing the pending entry on a terminal status.
    pub async fn handle_ack(&self, registry: &Registry, ack: &Envelope, now_millis: i64) {
        let Some(command_id) = ack.str_field("command_id") else {
            warn!("command_ack missing command_id");
            return;
        };
        let status = ack.str_field("status").unwrap_or("unknown").to_owned();
        let message = ack.str_field("message").unwrap_or("").to_owned();

        let client_id = {
            let mut pending = self.pending.write().await;
            let Some(entry) = pending.get_mut(command_id) else {
                warn!(command_id, "acknowledgement for unknown command");
                return;
            };
            entry.status.clone_from(&status);
            let client_id = entry.client_id.clone();
            if matches!(status.as_str(), "success" | "completed" | "failed" | "rejected") {
                pending.remove(command_id);
            }
            client_id
        };

        registry
            .send_to_client(
                &client_id,
                &OutboundMessage::CommandStatus {
                    command_id: command_id.to_owned(),
                    status,
                    message,
                    timestamp: Some(now_millis),
                },
            )
            .await;
    }

    async fn expire(&self, registry: &Registry, command_id: &str) {
        let client_id = {
            let mut pending = self.pending.write().await;
            match pending.get(command_id) {
                Some(entry) if entry.status == "pending" => {
                    let client_id = entry.client_id.clone();
                    pending.remove(command_id);
                    client_id
                }
                _ => return,
            }
        };

        let now_millis = i64::try_from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        )
        .unwrap_or(i64::MAX);

        registry
            .send_to_client(
                &client_id,
                &OutboundMessage::CommandStatus {
                    command_id: command_id.to_owned(),
                    status: "timeout".to_owned(),
                    message: "Device did not acknowledge command".to_owned(),
                    timestamp: Some(now_millis),
                },
            )
            .await;
    }

    /// Returns the `limit` most recent history entries for a device, oldest
    /// first within that window.
    pub async fn history(&self, device_id: &str, limit: usize) -> Vec<Value> {
        let history = self.history.read().await;
        let Some(bucket) = history.get(device_id) else {
            return Vec::new();
        };
        let skip = bucket.len().saturating_sub(limit);
        bucket.iter().skip(skip).cloned().collect()
    }
}
