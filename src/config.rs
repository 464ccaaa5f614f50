//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network configuration
    pub network: NetworkConfig,

    /// Server directory configuration
    pub directory: DirectoryConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Local bind address
    pub bind_address: String,

    /// Preferred UDP port (exact port for a server)
    pub port: u16,

    /// Offset added to `port` for the first client bind attempt
    pub client_port_offset: u16,

    /// Number of ports a client tries before giving up
    pub client_port_retries: u16,

    /// Socket send buffer size
    pub send_buffer_size: usize,

    /// Socket receive buffer size
    pub recv_buffer_size: usize,

    /// Size of the datagram receive buffer
    pub max_datagram_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            client_port_offset: CLIENT_PORT_OFFSET,
            client_port_retries: CLIENT_PORT_RETRIES,
            send_buffer_size: SOCKET_BUFFER_SIZE,
            recv_buffer_size: SOCKET_BUFFER_SIZE,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

/// Server directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// `name;city;country` of this server, optionally followed by
    /// `address;name;city;country` quadruples of predefined servers
    pub server_info: String,

    /// Address of the central server; `localhost` makes this node the
    /// central server, an empty string disables the directory
    pub central_address: String,

    /// Central server pings registered servers to keep their NAT port open
    pub ping_servers_in_list: bool,

    /// Run the directory timers
    pub enabled: bool,

    /// Number of audio channels this server offers
    pub num_channels: u16,

    /// Protocol timing
    pub timings: DirectoryTimings,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            server_info: String::new(),
            central_address: String::new(),
            ping_servers_in_list: true,
            enabled: true,
            num_channels: 10,
            timings: DirectoryTimings::default(),
        }
    }
}

/// Timing and size parameters of the directory protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryTimings {
    #[serde(with = "duration_secs")]
    pub register_interval: Duration,

    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,

    #[serde(with = "duration_secs")]
    pub ping_interval: Duration,

    #[serde(with = "duration_secs")]
    pub entry_timeout: Duration,

    /// Maximum list size including this server
    pub max_servers: usize,
}

impl Default for DirectoryTimings {
    fn default() -> Self {
        Self {
            register_interval: REGISTER_INTERVAL,
            poll_interval: POLL_INTERVAL,
            ping_interval: PING_INTERVAL,
            entry_timeout: ENTRY_TIMEOUT,
            max_servers: MAX_SERVERS_IN_LIST,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &PathBuf) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &PathBuf) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "conference-transport", "directory")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_covers_two_registrations() {
        let timings = DirectoryTimings::default();
        assert!(timings.entry_timeout > timings.register_interval * 2);
        assert!(timings.ping_interval < Duration::from_secs(60));
    }

    #[test]
    fn test_toml_roundtrip_keeps_timings() {
        let mut config = AppConfig::default();
        config.directory.central_address = "localhost".to_string();
        config.directory.timings.entry_timeout = Duration::from_secs(90);

        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("entry_timeout = 90"));

        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.directory.central_address, "localhost");
        assert_eq!(parsed.directory.timings, config.directory.timings);
        assert_eq!(parsed.network.port, DEFAULT_PORT);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let path = PathBuf::from("/nonexistent/conference-transport.toml");
        assert!(matches!(AppConfig::load(&path), Err(crate::Error::Io(_))));
    }
}
