//! Server list records

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::constants::{MAX_SERVER_CITY_LEN, MAX_SERVER_NAME_LEN, MAX_SERVER_TOPIC_LEN};
use crate::network::HostAddress;

/// Highest numeric country code accepted from configuration or the network
pub const MAX_COUNTRY_CODE: u16 = 246;

/// Numeric country code; 0 means "any country"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Country(pub u16);

impl Country {
    pub const ANY: Country = Country(0);

    /// Parse a decimal code, rejecting values outside the known range
    pub fn from_code(text: &str) -> Option<Self> {
        text.trim()
            .parse::<u16>()
            .ok()
            .filter(|code| *code <= MAX_COUNTRY_CODE)
            .map(Country)
    }
}

/// Properties a server announces when registering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Port the server believes it listens on (may differ behind NAT)
    pub local_port: u16,
    pub name: String,
    pub topic: String,
    pub city: String,
    pub country: Country,
    pub num_channels: u16,
    pub max_clients: u16,
    pub permanent_online: bool,
}

impl ServerInfo {
    /// Cut the text fields to their protocol limits so that a full list
    /// always fits into one datagram
    pub fn truncated(mut self) -> Self {
        truncate_utf8(&mut self.name, MAX_SERVER_NAME_LEN);
        truncate_utf8(&mut self.city, MAX_SERVER_CITY_LEN);
        truncate_utf8(&mut self.topic, MAX_SERVER_TOPIC_LEN);
        self
    }
}

/// Cut to at most `max_bytes`, never inside a character
fn truncate_utf8(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

/// One record of the directory
#[derive(Debug, Clone)]
pub struct ServerListEntry {
    /// Identity key, as observed by the central server
    pub address: HostAddress,
    pub info: ServerInfo,
    /// Time of the last (re-)registration
    pub registered_at: Instant,
}

impl ServerListEntry {
    pub fn new(address: HostAddress, info: ServerInfo) -> Self {
        Self::new_at(address, info, Instant::now())
    }

    pub fn new_at(address: HostAddress, info: ServerInfo, now: Instant) -> Self {
        Self {
            address,
            info: info.truncated(),
            registered_at: now,
        }
    }

    /// Apply a repeated registration. The channel count is a property of
    /// the entry's creation and is kept.
    pub fn refresh(&mut self, info: &ServerInfo, now: Instant) {
        let info = info.clone().truncated();
        self.info.local_port = info.local_port;
        self.info.name = info.name;
        self.info.topic = info.topic;
        self.info.country = info.country;
        self.info.city = info.city;
        self.info.max_clients = info.max_clients;
        self.info.permanent_online = info.permanent_online;
        self.registered_at = now;
    }

    /// Registration is older than `timeout` at `now`
    pub fn is_expired(&self, timeout: std::time::Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.registered_at) > timeout
    }

    pub fn to_item(&self) -> ServerListItem {
        ServerListItem {
            address: self.address,
            info: self.info.clone(),
        }
    }
}

/// Server list record as sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerListItem {
    pub address: HostAddress,
    pub info: ServerInfo,
}
