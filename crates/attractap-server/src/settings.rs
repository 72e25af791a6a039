use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use attractap_core::constants::{
    DEFAULT_ACK_ATTEMPTS, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_FIRMWARE_CHUNK_SIZE,
    DEFAULT_KEY_DERIVATION_ITERATIONS, DEFAULT_LIVENESS_TIMEOUT_MS, DEFAULT_MAX_FRAME_SIZE,
    INVALID_CARD_FEEDBACK_MS, RESOURCE_SELECTION_TAP_TIMEOUT_MS, SUCCESS_FEEDBACK_MS,
};
use attractap_gateway::{GatewayConfig, TcpServerConfig};
use attractap_storage::DatabaseConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub firmware: FirmwareSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub path: String,
    /// Keep everything in an in-memory SQLite database
    #[serde(default)]
    pub in_memory: bool,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirmwareSettings {
    /// Directory holding `firmwares.json` and the binaries
    pub directory: String,
}

/// Protocol tunables, in milliseconds where they are durations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub ack_timeout_ms: u64,
    pub ack_attempts: u32,
    pub error_feedback_ms: u64,
    pub success_feedback_ms: u64,
    pub selection_tap_timeout_ms: u64,
    /// Zero disables the liveness check
    pub liveness_timeout_ms: u64,
    pub firmware_chunk_size: usize,
    pub key_derivation_iterations: u32,
    pub max_frame_size: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            ack_attempts: DEFAULT_ACK_ATTEMPTS,
            error_feedback_ms: INVALID_CARD_FEEDBACK_MS,
            success_feedback_ms: SUCCESS_FEEDBACK_MS,
            selection_tap_timeout_ms: RESOURCE_SELECTION_TAP_TIMEOUT_MS,
            liveness_timeout_ms: DEFAULT_LIVENESS_TIMEOUT_MS,
            firmware_chunk_size: DEFAULT_FIRMWARE_CHUNK_SIZE,
            key_derivation_iterations: DEFAULT_KEY_DERIVATION_ITERATIONS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    /// Load settings, taking `overrides` instead of the process environment
    /// when given. Keys use the dotted form, e.g. `server.port`.
    pub fn load_with_sources(
        overrides: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 7300)?
            .set_default("server.max_connections", 100)?
            .set_default("database.path", "data/attractap.db")?
            .set_default("database.max_connections", 10)?
            .set_default("firmware.directory", "firmware")?
            .add_source(File::with_name("config/attractap").required(false));

        if let Some(vars) = overrides {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // ATTRACTAP_SERVER__PORT, ATTRACTAP_GATEWAY__ACK_ATTEMPTS, ...
            builder = builder.add_source(
                Environment::with_prefix("ATTRACTAP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }

    pub fn tcp_server_config(&self) -> Result<TcpServerConfig, std::net::AddrParseError> {
        let bind_addr: SocketAddr = format!("{}:{}", self.server.host, self.server.port).parse()?;
        Ok(TcpServerConfig {
            bind_addr,
            max_connections: self.server.max_connections,
        })
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database.path.clone())
            .max_connections(self.database.max_connections)
            .auto_migrate(true)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        let g = &self.gateway;
        let liveness =
            (g.liveness_timeout_ms > 0).then(|| Duration::from_millis(g.liveness_timeout_ms));

        GatewayConfig::new()
            .ack_timeout(Duration::from_millis(g.ack_timeout_ms))
            .ack_attempts(g.ack_attempts)
            .error_feedback(Duration::from_millis(g.error_feedback_ms))
            .success_feedback(Duration::from_millis(g.success_feedback_ms))
            .selection_tap_timeout(Duration::from_millis(g.selection_tap_timeout_ms))
            .liveness_timeout(liveness)
            .firmware_chunk_size(g.firmware_chunk_size)
            .key_derivation_iterations(g.key_derivation_iterations)
            .max_frame_size(g.max_frame_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn load(pairs: &[(&str, &str)]) -> Settings {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::load_with_sources(Some(vars)).expect("Failed to load settings")
    }

    #[test]
    fn test_default_settings() {
        let settings = load(&[]);

        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 7300);
        assert_eq!(settings.server.max_connections, 100);
        assert!(!settings.database.in_memory);
        assert_eq!(settings.gateway.ack_attempts, 3);
        assert_eq!(settings.gateway.ack_timeout_ms, 4_000);
    }

    #[test]
    fn test_overrides() {
        let settings = load(&[
            ("server.host", "127.0.0.1"),
            ("server.port", "7400"),
            ("database.in_memory", "true"),
            ("gateway.ack_attempts", "5"),
        ]);

        assert_eq!(settings.server.port, 7400);
        assert!(settings.database.in_memory);
        assert_eq!(settings.gateway.ack_attempts, 5);
        // Untouched tunables keep their defaults
        assert_eq!(settings.gateway.success_feedback_ms, 10_000);

        let tcp = settings.tcp_server_config().unwrap();
        assert_eq!(tcp.bind_addr, "127.0.0.1:7400".parse().unwrap());
    }

    #[rstest]
    #[case("0", None)]
    #[case("90000", Some(Duration::from_secs(90)))]
    fn test_liveness_timeout(#[case] value: &str, #[case] expected: Option<Duration>) {
        let settings = load(&[("gateway.liveness_timeout_ms", value)]);
        assert_eq!(settings.gateway_config().liveness_timeout, expected);
    }

    #[test]
    fn test_invalid_host() {
        let settings = load(&[("server.host", "not a host")]);
        assert!(settings.tcp_server_config().is_err());
    }
}
