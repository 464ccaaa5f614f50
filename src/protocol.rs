//! Directory protocol messages and their datagram envelope
//!
//! ## Packet Format
//!
//! ```text
//! ┌──────────┬─────────────────────────────────────────────────────────────┐
//! │ Magic(2) │  bincode(DirectoryMessage)                                  │
//! │  0xDC01  │  variant tag + fields, varint integers                      │
//! └──────────┴─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Datagrams that do not start with the magic number are audio traffic and
//! never reach this module's decoder successfully.

use bincode::Options;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::directory::{ServerInfo, ServerListItem};
use crate::network::HostAddress;

/// Magic number for directory messages.
///
/// Datagrams starting with its little-endian bytes `01 DC` are reserved for
/// the directory: the audio framing must never begin with this prefix, or
/// such audio packets may decode as directory messages and be consumed by
/// the server core.
pub const MESSAGE_MAGIC: u16 = 0xDC01;

/// Header size in bytes
pub const HEADER_SIZE: usize = 2;

/// Logical messages exchanged by directory nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryMessage {
    /// Liveness / NAT keep-alive without content
    EmptyKeepAlive,

    /// Slave → central: register or refresh the sender
    RegisterServer(ServerInfo),

    /// Slave → central: remove the sender
    UnregisterServer,

    /// Client → central: ask for the server list
    QueryServerList,

    /// Central → client: the server list
    ServerList(Vec<ServerListItem>),

    /// Central → listed server: send an empty message to `target` so that
    /// the listed server's NAT lets the target's traffic in
    RequestEmptyMessage { target: HostAddress },
}

impl DirectoryMessage {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyKeepAlive => "empty",
            Self::RegisterServer(_) => "register",
            Self::UnregisterServer => "unregister",
            Self::QueryServerList => "query-list",
            Self::ServerList(_) => "server-list",
            Self::RequestEmptyMessage { .. } => "request-empty",
        }
    }

    /// Serialize message to bytes for network transmission
    pub fn serialize(&self) -> crate::Result<Bytes> {
        let body = codec().serialize(self)?;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
        buf.put_u16_le(MESSAGE_MAGIC);
        buf.put_slice(&body);

        Ok(buf.freeze())
    }

    /// Deserialize message from a datagram; `None` for anything else
    pub fn deserialize(mut data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_SIZE + 1 {
            return None;
        }

        if data.get_u16_le() != MESSAGE_MAGIC {
            return None;
        }

        codec().deserialize(data).ok()
    }
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_DATAGRAM_SIZE as u64)
}

/// Outbound side of the directory protocol. Sends are fire-and-forget.
pub trait MessageChannel: Send + Sync {
    fn send(&self, to: HostAddress, message: DirectoryMessage);
}
