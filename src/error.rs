//! Error types for the conference transport

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Cannot bind the socket on port {port} (maybe the software is already running): {reason}")]
    BindFailed { port: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Dispatcher does not match the router role")]
    RoleMismatch,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
