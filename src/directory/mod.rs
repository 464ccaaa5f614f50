//! Server directory
//!
//! One node acts as the central server that keeps a bounded, self-expiring
//! list of servers; every other server is a slave that registers itself
//! there periodically and keeps its NAT port open with empty messages.
//!
//! ```text
//!   slot 0            this server (never evicted, never updated remotely)
//!   slot 1..=n        predefined servers from the configuration
//!   slot n+1..max     registered servers, evicted after the entry timeout
//! ```
//!
//! All list access goes through one mutex. Timers only hold a weak
//! reference to the directory.

pub mod central;
pub mod entry;
pub mod slave;
pub mod timer;

pub use entry::{Country, ServerInfo, ServerListEntry, ServerListItem, MAX_COUNTRY_CODE};
pub use timer::PeriodicTimer;

use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};

use crate::config::{DirectoryConfig, DirectoryTimings};
use crate::network::HostAddress;
use crate::protocol::MessageChannel;

/// Role of this node in the directory service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryRole {
    Central,
    Slave,
}

impl DirectoryRole {
    /// Central iff the configured central address names this host
    pub fn for_central_address(address: &str) -> Self {
        if is_local_address(address) {
            Self::Central
        } else {
            Self::Slave
        }
    }
}

/// `localhost` (any case, optional port) or a loopback literal
pub fn is_local_address(address: &str) -> bool {
    let address = address.trim();
    let host = match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => address,
    };

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return addr.ip().is_loopback();
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

pub(crate) struct DirectoryState {
    /// Slot 0 is this server, then predefined, then registered servers
    pub(crate) entries: Vec<ServerListEntry>,
    pub(crate) num_predefined: usize,
    pub(crate) central_address: String,
    pub(crate) role: DirectoryRole,
    pub(crate) enabled: bool,
    /// Central server address as resolved by the last registration
    pub(crate) central_host: HostAddress,
}

impl DirectoryState {
    /// Index of the first registered (evictable) slot
    pub(crate) fn first_dynamic(&self) -> usize {
        1 + self.num_predefined
    }

    pub(crate) fn is_active_central(&self) -> bool {
        self.enabled && self.role == DirectoryRole::Central
    }
}

struct DirectoryTimers {
    poll_list: PeriodicTimer,
    ping_servers: PeriodicTimer,
    register: PeriodicTimer,
    ping_central: PeriodicTimer,
}

impl DirectoryTimers {
    fn new() -> Self {
        Self {
            poll_list: PeriodicTimer::new("poll-list"),
            ping_servers: PeriodicTimer::new("ping-servers"),
            register: PeriodicTimer::new("register"),
            ping_central: PeriodicTimer::new("ping-central"),
        }
    }

    fn stop_all(&mut self) {
        self.poll_list.stop();
        self.ping_servers.stop();
        self.register.stop();
        self.ping_central.stop();
    }
}

/// Turns a configured host name into an address; may block on DNS
pub(crate) type Resolver = Box<dyn Fn(&str) -> Option<HostAddress> + Send + Sync>;

/// Server list manager for both directory roles
pub struct ServerDirectory {
    pub(crate) state: Mutex<DirectoryState>,
    timers: Mutex<DirectoryTimers>,
    pub(crate) channel: Arc<dyn MessageChannel>,
    pub(crate) resolver: Resolver,
    pub(crate) timings: DirectoryTimings,
    ping_servers_in_list: bool,
}

impl ServerDirectory {
    /// Build the list from the configuration. `port` is the port this
    /// server listens on. Timers are not running until [`update`] is called.
    ///
    /// [`update`]: ServerDirectory::update
    pub fn new(port: u16, config: &DirectoryConfig, channel: Arc<dyn MessageChannel>) -> Self {
        let (entries, num_predefined) = parse_server_info(
            &config.server_info,
            port,
            config.num_channels,
            config.timings.max_servers,
        );

        let central_address = config.central_address.trim().to_string();
        let role = DirectoryRole::for_central_address(&central_address);
        let enabled = config.enabled && !central_address.is_empty();

        tracing::info!(
            "Server directory: {:?} role, {} predefined server(s), {}",
            role,
            num_predefined,
            if enabled { "enabled" } else { "disabled" }
        );

        Self {
            state: Mutex::new(DirectoryState {
                entries,
                num_predefined,
                central_address,
                role,
                enabled,
                central_host: HostAddress::default(),
            }),
            timers: Mutex::new(DirectoryTimers::new()),
            channel,
            resolver: Box::new(HostAddress::parse),
            timings: config.timings,
            ping_servers_in_list: config.ping_servers_in_list,
        }
    }

    /// Change the central server address. An empty address disables the
    /// directory; any other address enables it and selects the role.
    /// Takes effect for the timers on the next [`update`](Self::update).
    pub fn set_central_address(&self, address: &str) {
        let mut state = self.state.lock();
        let address = address.trim();

        state.central_address = address.to_string();
        state.role = DirectoryRole::for_central_address(address);
        state.enabled = !address.is_empty();
        state.central_host = HostAddress::default();
    }

    /// Takes effect for the timers on the next [`update`](Self::update)
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.enabled = enabled && !state.central_address.is_empty();
    }

    /// Apply the current role and enable flag to the timers
    pub fn update(self: &Arc<Self>) {
        let (enabled, role) = {
            let state = self.state.lock();
            (state.enabled, state.role)
        };

        let mut timers = self.timers.lock();
        timers.stop_all();

        if !enabled {
            tracing::info!("Server directory stopped");
            return;
        }

        match role {
            DirectoryRole::Central => {
                let weak = Arc::downgrade(self);
                timers.poll_list.start(self.timings.poll_interval, move || {
                    with_directory(&weak, |directory| directory.prune_expired())
                });

                if self.ping_servers_in_list {
                    let weak = Arc::downgrade(self);
                    timers.ping_servers.start(self.timings.ping_interval, move || {
                        with_directory(&weak, |directory| directory.ping_listed_servers())
                    });
                }

                tracing::info!("Central server directory running");
            }
            DirectoryRole::Slave => {
                // register right away instead of waiting for the first tick;
                // the state lock is not held here
                self.register_with_central(true);

                let weak = Arc::downgrade(self);
                timers.register.start(self.timings.register_interval, move || {
                    with_directory(&weak, |directory| directory.register_with_central(true))
                });

                // sent even without NAT, the traffic is negligible
                let weak = Arc::downgrade(self);
                timers.ping_central.start(self.timings.ping_interval, move || {
                    with_directory(&weak, |directory| directory.ping_central())
                });

                tracing::info!("Slave server directory running");
            }
        }
    }

    /// Stop all timers; a registered slave unregisters from the central
    pub fn shutdown(&self) {
        self.timers.lock().stop_all();

        let unregister = {
            let state = self.state.lock();
            state.enabled && state.role == DirectoryRole::Slave
        };
        if unregister {
            self.register_with_central(false);
        }
    }

    /// Replace the announced properties of this server
    pub fn set_own_info(&self, info: ServerInfo) {
        let mut state = self.state.lock();
        if let Some(own) = state.entries.first_mut() {
            own.info = info.truncated();
        }
    }

    pub fn own_info(&self) -> ServerInfo {
        let state = self.state.lock();
        state.entries.first().map(|own| own.info.clone()).unwrap_or_default()
    }

    /// Snapshot of the whole list
    pub fn entries(&self) -> Vec<ServerListEntry> {
        self.state.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn num_predefined(&self) -> usize {
        self.state.lock().num_predefined
    }

    pub fn role(&self) -> DirectoryRole {
        self.state.lock().role
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn central_address(&self) -> String {
        self.state.lock().central_address.clone()
    }

    /// Central server address resolved by the last registration
    pub fn resolved_central(&self) -> HostAddress {
        self.state.lock().central_host
    }

    /// Any timer currently scheduled
    pub fn timers_active(&self) -> bool {
        let timers = self.timers.lock();
        timers.poll_list.is_active()
            || timers.ping_servers.is_active()
            || timers.register.is_active()
            || timers.ping_central.is_active()
    }
}

fn with_directory(weak: &Weak<ServerDirectory>, f: impl FnOnce(&ServerDirectory)) -> bool {
    match weak.upgrade() {
        Some(directory) => {
            f(&directory);
            true
        }
        None => false,
    }
}

/// Parse `name;city;country` followed by `address;name;city;country`
/// quadruples. Returns the list (own entry first) and the number of
/// predefined servers. Trailing fragments shorter than a quadruple are
/// ignored.
pub fn parse_server_info(
    text: &str,
    port: u16,
    num_channels: u16,
    max_servers: usize,
) -> (Vec<ServerListEntry>, usize) {
    let items: Vec<&str> = if text.is_empty() {
        Vec::new()
    } else {
        text.split(';').collect()
    };

    let mut own = ServerInfo {
        local_port: port,
        num_channels,
        max_clients: num_channels,
        permanent_online: true,
        ..Default::default()
    };

    if items.len() >= 3 {
        own.name = items[0].to_string();
        own.city = items[1].to_string();
        if let Some(country) = Country::from_code(items[2]) {
            own.country = country;
        }
    }

    let mut entries = vec![ServerListEntry::new(HostAddress::default(), own)];
    let mut num_predefined = 0;

    for quad in items.get(3..).unwrap_or_default().chunks_exact(4) {
        if entries.len() >= max_servers {
            break;
        }

        let address = HostAddress::parse(quad[0]).unwrap_or_else(|| {
            tracing::warn!("Cannot resolve predefined server address '{}'", quad[0]);
            HostAddress::default()
        });

        let info = ServerInfo {
            local_port: 0,
            name: quad[1].to_string(),
            city: quad[2].to_string(),
            country: Country::from_code(quad[3]).unwrap_or(Country::ANY),
            num_channels,
            max_clients: num_channels,
            permanent_online: true,
            ..Default::default()
        };

        entries.push(ServerListEntry::new(address, info));
        num_predefined += 1;
    }

    (entries, num_predefined)
}
