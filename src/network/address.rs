//! Host address value type used as identity key throughout the crate

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};

use crate::constants::DEFAULT_PORT;

/// Network endpoint (IP + port). The default value `0.0.0.0:0` means "unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for HostAddress {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl HostAddress {
    pub const fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// IPv4 loopback address with the given port
    pub const fn localhost(port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    /// True for the "unset" sentinel
    pub fn is_unset(&self) -> bool {
        *self == Self::default()
    }

    /// Both addresses point at the same machine (ports ignored)
    pub fn same_host(&self, other: &HostAddress) -> bool {
        self.ip == other.ip
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Parse or resolve `text` using the default server port when none is
    /// given. See [`HostAddress::resolve`].
    pub fn parse(text: &str) -> Option<Self> {
        Self::resolve(text, DEFAULT_PORT)
    }

    /// Parse a literal (`1.2.3.4`, `1.2.3.4:22124`, `[::1]:22124`) or resolve
    /// a host name (`example.org`, `example.org:22124`) through the system
    /// resolver. IPv4 results are preferred. Returns `None` when the text is
    /// empty or cannot be resolved.
    pub fn resolve(text: &str, default_port: u16) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if let Ok(addr) = text.parse::<SocketAddr>() {
            return Some(addr.into());
        }
        if let Ok(ip) = text.parse::<IpAddr>() {
            return Some(Self::new(ip, default_port));
        }

        let (host, port) = split_host_port(text, default_port);
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(Self::new(ip, port));
        }

        let resolved: Vec<SocketAddr> = (host, port).to_socket_addrs().ok()?.collect();
        resolved
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| resolved.first())
            .map(|addr| HostAddress::from(*addr))
    }
}

/// Split `host:port`; a missing or unparsable port yields `default_port`
fn split_host_port(text: &str, default_port: u16) -> (&str, u16) {
    let stripped = text.trim_start_matches('[');
    if let Some((host, port)) = stripped.rsplit_once(':') {
        // bare IPv6 literals contain several colons and were handled earlier
        if !host.contains(':') || host.ends_with(']') {
            if let Ok(port) = port.parse::<u16>() {
                return (host.trim_end_matches(']'), port);
            }
        }
    }
    (stripped.trim_end_matches(']'), default_port)
}

impl From<SocketAddr> for HostAddress {
    fn from(addr: SocketAddr) -> Self {
        // IPv4-mapped senders on dual-stack sockets compare equal to plain IPv4
        let ip = match addr.ip() {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
            ip => ip,
        };
        Self::new(ip, addr.port())
    }
}

impl From<HostAddress> for SocketAddr {
    fn from(addr: HostAddress) -> Self {
        addr.socket_addr()
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}
