//! Process-environment configuration loading.
//!
//! Every variable is optional; absence falls back to the defaults the
//! source shipped (see `relay_core::config::RelayConfig::default`).

use std::env;
use std::time::Duration;

use relay_core::RelayConfig;

pub struct ServerConfig {
    pub bind_addr: String,
    pub log_level: String,
    pub log_dir: String,
    pub relay: RelayConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8000);

        let mut relay = RelayConfig::default();
        if let Some(secs) = parse_env_u64("PING_INTERVAL") {
            relay.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("CONNECTION_TIMEOUT") {
            relay.connection_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parse_env_usize("TELEMETRY_BUFFER_SIZE") {
            relay.telemetry_buffer_size = size;
        }
        if let Ok(raw) = env::var("WEBRTC_ICE_SERVERS") {
            if let Ok(parsed) = serde_json::from_str(&raw) {
                relay.ice_servers = parsed;
            } else {
                tracing::warn!("WEBRTC_ICE_SERVERS is not valid JSON, keeping default");
            }
        }

        Self {
            bind_addr: format!("0.0.0.0:{port}"),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned()),
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_owned()),
            relay,
        }
    }
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn parse_env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_is_unset() {
        let config = ServerConfig {
            bind_addr: "0.0.0.0:8000".to_owned(),
            log_level: "info".to_owned(),
            log_dir: "logs".to_owned(),
            relay: RelayConfig::default(),
        };
        assert_eq!(config.relay.telemetry_buffer_size, 100);
    }

    #[test]
    fn parse_env_u64_rejects_garbage() {
        env::set_var("TEST_RELAY_PARSE_U64", "not-a-number");
        assert_eq!(parse_env_u64("TEST_RELAY_PARSE_U64"), None);
        env::remove_var("TEST_RELAY_PARSE_U64");
    }
}
