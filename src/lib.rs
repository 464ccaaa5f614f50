//! # Conference Transport
//!
//! Network transport core of a low-latency audio conferencing system.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               SERVER PROCESS                            │
//! │                                                                         │
//! │   UDP datagrams                                                         │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │            Packet Router (network::router) - Single Socket        │  │
//! │  │   client role: sender == channel address ? channel : invalid     │  │
//! │  │   server role: every datagram -> server core                     │  │
//! │  └───────────────┬──────────────────────────────────┬───────────────┘  │
//! │                  │                                  │                  │
//! │                  ▼                                  ▼                  │
//! │  ┌───────────────────────────────┐   ┌──────────────────────────────┐  │
//! │  │  Directory Server Core        │   │  Audio consumer              │  │
//! │  │  (server) decode + dispatch   │──▶│  (channel / connection table)│  │
//! │  └───────────────┬───────────────┘   └──────────────────────────────┘  │
//! │                  ▼                                                     │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  Server Directory (directory)                     │  │
//! │  │  [0] this server │ [1..=n] predefined │ [n+1..] registered        │  │
//! │  │  central: register / unregister / prune / query / ping           │  │
//! │  │  slave:   register at central / keep-alive ping                  │  │
//! │  └───────────────┬──────────────────────────────────────────────────┘  │
//! │                  │ MessageChannel (protocol envelope)                  │
//! │                  ▼                                                     │
//! │            Router send handle ──▶ UDP                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod network;
pub mod protocol;
pub mod server;
pub mod sound;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default UDP port of a conference server
    pub const DEFAULT_PORT: u16 = 22124;

    /// Clients bind at the preferred port plus this offset so that a client
    /// and a server can run on the same host
    pub const CLIENT_PORT_OFFSET: u16 = 10;

    /// Number of consecutive ports a client tries before giving up
    pub const CLIENT_PORT_RETRIES: u16 = 40;

    /// Size of the receive buffer in bytes
    pub const MAX_DATAGRAM_SIZE: usize = 20_000;

    /// Kernel socket buffer sizes
    pub const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

    /// Re-registration interval of a slave server
    pub const REGISTER_INTERVAL: Duration = Duration::from_secs(15 * 60);

    /// Interval at which the central server evicts stale entries
    pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

    /// Keep-alive interval for NAT mappings (both roles)
    pub const PING_INTERVAL: Duration = Duration::from_millis(59_000);

    /// Age after which a registered server is dropped. Must stay above two
    /// registration intervals so that one lost registration is tolerated.
    pub const ENTRY_TIMEOUT: Duration = Duration::from_secs(33 * 60);

    /// Maximum number of entries in a server list, including this server
    pub const MAX_SERVERS_IN_LIST: usize = 100;

    /// Longest server name in UTF-8 bytes kept from a registration
    pub const MAX_SERVER_NAME_LEN: usize = 20;

    /// Longest city name in UTF-8 bytes kept from a registration
    pub const MAX_SERVER_CITY_LEN: usize = 20;

    /// Longest topic in UTF-8 bytes kept from a registration
    pub const MAX_SERVER_TOPIC_LEN: usize = 32;

    /// Capacity of the server wake-up queue
    pub const SERVER_EVENT_QUEUE: usize = 64;
}
