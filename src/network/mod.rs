//! Network subsystem: the UDP socket and the packet router
//!
//! Contains modules for:
//! - Host addresses (identity keys of every endpoint)
//! - UDP socket creation with the client/server port policy
//! - Demultiplexing inbound datagrams to channels or the server core
//! - Sending directory messages through the router

pub mod address;
pub mod channel;
pub mod router;
pub mod udp;

pub use address::HostAddress;
pub use channel::RouterMessageChannel;
pub use router::{
    ChannelConsumer, DeliveryStatus, Dispatcher, PacketRouter, PutDataStatus, QueuedObserver,
    RouterEvent, RouterHandle, RouterObserver, RouterRole, RouterStats, ServerConsumer,
    ServerEvent,
};
pub use udp::create_socket;
