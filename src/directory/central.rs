//! Central server role: registration, eviction and list queries

use std::net::{IpAddr, Ipv4Addr};
use tokio::time::Instant;

use super::{ServerDirectory, ServerInfo, ServerListEntry, ServerListItem};
use crate::network::HostAddress;
use crate::protocol::DirectoryMessage;

impl ServerDirectory {
    /// Register a server or refresh its registration
    pub fn register_server(&self, address: HostAddress, info: ServerInfo) {
        self.register_server_at(address, info, Instant::now());
    }

    pub(crate) fn register_server_at(&self, address: HostAddress, info: ServerInfo, now: Instant) {
        let mut state = self.state.lock();
        if !state.is_active_central() {
            return;
        }

        // addresses are unique keys: the first match is the only match
        let first_dynamic = state.first_dynamic();
        match state.entries.iter().skip(1).position(|e| e.address == address) {
            Some(offset) if offset + 1 >= first_dynamic => {
                state.entries[offset + 1].refresh(&info, now);
                tracing::debug!("Refreshed registration of {}", address);
            }
            Some(_) => {
                // predefined servers keep their configured data
                tracing::trace!("Ignoring registration of predefined server {}", address);
            }
            None if state.entries.len() < self.timings.max_servers => {
                tracing::debug!("Registered server '{}' at {}", info.name, address);
                state.entries.push(ServerListEntry::new_at(address, info, now));
            }
            None => {
                tracing::debug!("Server list full, dropping registration of {}", address);
            }
        }
    }

    /// Remove a registered server. Own and predefined entries are never removed.
    pub fn unregister_server(&self, address: HostAddress) {
        let mut state = self.state.lock();
        if !state.is_active_central() {
            return;
        }

        let first_dynamic = state.first_dynamic();
        if let Some(offset) = state.entries[first_dynamic..]
            .iter()
            .position(|e| e.address == address)
        {
            state.entries.remove(first_dynamic + offset);
            tracing::debug!("Unregistered server at {}", address);
        }
    }

    /// Evict registered servers whose registration timed out
    pub fn prune_expired(&self) {
        self.prune_expired_at(Instant::now());
    }

    pub(crate) fn prune_expired_at(&self, now: Instant) {
        let mut state = self.state.lock();
        let timeout = self.timings.entry_timeout;

        let first_dynamic = state.first_dynamic().min(state.entries.len());
        let mut registered = state.entries.split_off(first_dynamic);
        let before = registered.len();
        registered.retain(|entry| {
            let expired = entry.is_expired(timeout, now);
            if expired {
                tracing::debug!("Registration of {} timed out", entry.address);
            }
            !expired
        });
        let evicted = before - registered.len();
        state.entries.append(&mut registered);

        if evicted > 0 {
            tracing::info!("Evicted {} stale server(s), {} listed", evicted, state.entries.len());
        }
    }

    /// Answer a list query from `requester` and return what was sent.
    ///
    /// Entries on the requester's own host are rewritten to loopback; for
    /// registered servers the port becomes the server's own local port
    /// since a NAT may have changed the observed one. Every other listed
    /// server is asked to send an empty message to the requester so that
    /// its NAT accepts the requester's first packets.
    pub fn query_list(&self, requester: HostAddress) -> Vec<ServerListItem> {
        let state = self.state.lock();
        if !state.is_active_central() {
            return Vec::new();
        }

        let num_predefined = state.num_predefined;
        let items: Vec<ServerListItem> = state
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let mut item = entry.to_item();
                if idx == 0 {
                    return item;
                }

                if entry.address.same_host(&requester) {
                    item.address.ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
                    if idx > num_predefined {
                        item.address.port = entry.info.local_port;
                    }
                } else if !entry.address.is_unset() {
                    self.channel.send(
                        entry.address,
                        DirectoryMessage::RequestEmptyMessage { target: requester },
                    );
                }
                item
            })
            .collect();

        self.channel.send(requester, DirectoryMessage::ServerList(items.clone()));
        tracing::trace!("Sent {} server(s) to {}", items.len(), requester);

        items
    }

    /// Keep the NAT ports of registered servers open
    pub fn ping_listed_servers(&self) {
        let state = self.state.lock();
        for entry in &state.entries[state.first_dynamic().min(state.entries.len())..] {
            self.channel.send(entry.address, DirectoryMessage::EmptyKeepAlive);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{directory_with, RecordingChannel};
    use super::*;
    use crate::config::DirectoryTimings;
    use crate::directory::Country;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    const PREDEFINED: &str = "Central;Berlin;5;10.0.0.2:22124;Peer;Paris;2";

    fn addr(text: &str) -> HostAddress {
        HostAddress::parse(text).unwrap()
    }

    fn info(name: &str, local_port: u16) -> ServerInfo {
        ServerInfo {
            local_port,
            name: name.to_string(),
            topic: "Jazz".to_string(),
            city: "Hamburg".to_string(),
            country: Country(3),
            num_channels: 10,
            max_clients: 10,
            permanent_online: false,
        }
    }

    fn central(timings: DirectoryTimings) -> (ServerDirectory, Arc<RecordingChannel>) {
        directory_with(PREDEFINED, "localhost", timings)
    }

    #[test]
    fn test_register_new_server() {
        let (directory, _) = central(DirectoryTimings::default());

        directory.register_server(addr("1.2.3.4:5000"), info("Jam", 22124));

        let entries = directory.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].address, addr("1.2.3.4:5000"));
        assert_eq!(entries[2].info, info("Jam", 22124));
    }

    #[test]
    fn test_register_twice_updates_in_place() {
        let (directory, _) = central(DirectoryTimings::default());
        let server = addr("1.2.3.4:5000");

        directory.register_server(server, info("Jam", 22124));
        directory.register_server(server, info("Renamed", 22125));

        let entries = directory.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].info.name, "Renamed");
        assert_eq!(entries[2].info.local_port, 22125);
    }

    #[test]
    fn test_register_ignored_unless_active_central() {
        let (slave, _) = directory_with(PREDEFINED, "10.9.9.9", DirectoryTimings::default());
        slave.register_server(addr("1.2.3.4:5000"), info("Jam", 22124));
        assert_eq!(slave.len(), 2);

        let (directory, _) = central(DirectoryTimings::default());
        directory.set_enabled(false);
        directory.register_server(addr("1.2.3.4:5000"), info("Jam", 22124));
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn test_predefined_server_is_not_overwritten() {
        let (directory, _) = central(DirectoryTimings::default());

        directory.register_server(addr("10.0.0.2:22124"), info("Impostor", 1));

        let entries = directory.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].info.name, "Peer");
    }

    #[test]
    fn test_full_list_drops_new_registrations() {
        let timings = DirectoryTimings {
            max_servers: 3,
            ..Default::default()
        };
        let (directory, _) = central(timings);

        directory.register_server(addr("1.1.1.1:1"), info("First", 1));
        directory.register_server(addr("2.2.2.2:2"), info("Second", 2));

        let entries = directory.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].info.name, "First");

        // refreshing an existing entry still works when full
        directory.register_server(addr("1.1.1.1:1"), info("Again", 1));
        assert_eq!(directory.entries()[2].info.name, "Again");
    }

    #[test]
    fn test_unregister_removes_only_registered_entries() {
        let (directory, _) = central(DirectoryTimings::default());
        directory.register_server(addr("1.2.3.4:5000"), info("Jam", 22124));
        directory.register_server(addr("5.6.7.8:5000"), info("Other", 22124));

        directory.unregister_server(addr("10.0.0.2:22124"));
        directory.unregister_server(HostAddress::default());
        assert_eq!(directory.len(), 4);

        directory.unregister_server(addr("1.2.3.4:5000"));
        let entries = directory.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].info.name, "Other");

        directory.unregister_server(addr("9.9.9.9:1"));
        assert_eq!(directory.len(), 3);
    }

    #[test]
    fn test_prune_scenario() {
        let timings = DirectoryTimings {
            entry_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let (directory, _) = central(timings);
        let start = Instant::now();

        directory.register_server_at(addr("1.2.3.4:5000"), info("A", 1), start);

        directory.prune_expired_at(start + Duration::from_secs(30));
        assert_eq!(directory.len(), 3);

        directory.prune_expired_at(start + Duration::from_secs(61));
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn test_prune_adjacent_expired_entries() {
        let timings = DirectoryTimings {
            entry_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let (directory, _) = central(timings);
        let start = Instant::now();

        // two stale entries next to each other, then a fresh one
        directory.register_server_at(addr("1.1.1.1:1"), info("Stale1", 1), start);
        directory.register_server_at(addr("2.2.2.2:2"), info("Stale2", 2), start);
        directory.register_server_at(addr("3.3.3.3:3"), info("Fresh", 3), start + Duration::from_secs(50));

        directory.prune_expired_at(start + Duration::from_secs(100));

        let names: Vec<String> = directory.entries().into_iter().map(|e| e.info.name).collect();
        assert_eq!(names, vec!["Central", "Peer", "Fresh"]);
    }

    #[test]
    fn test_query_rewrites_requesters_own_server() {
        let (directory, channel) = central(DirectoryTimings::default());
        let behind_nat = addr("1.2.3.4:40000");
        let other = addr("5.6.7.8:22124");
        directory.register_server(behind_nat, info("Mine", 22124));
        directory.register_server(other, info("Other", 22124));
        channel.take();

        let requester = addr("1.2.3.4:50000");
        let items = directory.query_list(requester);

        assert_eq!(items.len(), 4);
        assert_eq!(items[2].address, HostAddress::localhost(22124));
        assert_eq!(items[3].address, other);

        // stored entry is untouched
        assert_eq!(directory.entries()[2].address, behind_nat);

        let sent = channel.take();
        assert!(sent.contains(&(
            addr("10.0.0.2:22124"),
            DirectoryMessage::RequestEmptyMessage { target: requester }
        )));
        assert!(sent.contains(&(other, DirectoryMessage::RequestEmptyMessage { target: requester })));
        assert!(!sent.iter().any(|(to, _)| *to == behind_nat));
        assert_eq!(sent.last(), Some(&(requester, DirectoryMessage::ServerList(items))));
    }

    #[test]
    fn test_full_list_of_long_names_fits_one_datagram() {
        let (directory, channel) = central(DirectoryTimings::default());
        for i in 0..200u16 {
            let oversized = ServerInfo {
                name: "n".repeat(12_000),
                city: "c".repeat(500),
                topic: "t".repeat(500),
                ..info("", 22124)
            };
            let server = HostAddress::new(format!("10.1.{}.{}", i / 250, i % 250).parse().unwrap(), 40000 + i);
            directory.register_server(server, oversized);
        }
        assert_eq!(directory.len(), 100);
        channel.take();

        directory.query_list(addr("9.9.9.9:50000"));

        let (_, list) = channel.take().pop().unwrap();
        assert!(matches!(&list, DirectoryMessage::ServerList(items) if items.len() == 100));
        assert!(list.serialize().is_ok());
    }

    #[test]
    fn test_query_keeps_predefined_port() {
        let (directory, channel) = central(DirectoryTimings::default());

        let items = directory.query_list(addr("10.0.0.2:9999"));
        assert_eq!(items[1].address, HostAddress::localhost(22124));
        assert_eq!(items[0].info.name, "Central");

        let sent = channel.take();
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn test_ping_only_registered_servers() {
        let (directory, channel) = central(DirectoryTimings::default());
        directory.register_server(addr("1.2.3.4:5000"), info("Jam", 22124));
        directory.register_server(addr("5.6.7.8:5000"), info("Other", 22124));

        directory.ping_listed_servers();

        let sent = channel.take();
        assert_eq!(
            sent,
            vec![
                (addr("1.2.3.4:5000"), DirectoryMessage::EmptyKeepAlive),
                (addr("5.6.7.8:5000"), DirectoryMessage::EmptyKeepAlive),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_central_timers_evict_and_ping() {
        let timings = DirectoryTimings {
            poll_interval: Duration::from_secs(10),
            ping_interval: Duration::from_secs(5),
            entry_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let (directory, channel) = central(timings);
        let directory = Arc::new(directory);
        directory.update();

        directory.register_server(addr("1.2.3.4:5000"), info("Jam", 22124));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(channel
            .take()
            .contains(&(addr("1.2.3.4:5000"), DirectoryMessage::EmptyKeepAlive)));
        assert_eq!(directory.len(), 3);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(directory.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_registrations_respect_bound(
            hosts in prop::collection::vec(0u8..40, 0..80),
            max_servers in 2usize..20,
        ) {
            let timings = DirectoryTimings { max_servers, ..Default::default() };
            let (directory, _) = central(timings);

            for host in &hosts {
                let before = directory.len();
                let address = HostAddress::new(IpAddr::V4(Ipv4Addr::new(172, 16, 0, *host)), 22124);
                let known = directory.entries().iter().any(|e| e.address == address);

                directory.register_server(address, info("P", 1));

                let expected = if known || before >= max_servers { before } else { before + 1 };
                prop_assert_eq!(directory.len(), expected);
            }

            let entries = directory.entries();
            prop_assert!(entries.len() <= max_servers.max(2));
            prop_assert_eq!(&entries[0].info.name, "Central");
            prop_assert_eq!(&entries[1].info.name, "Peer");
        }

        #[test]
        fn prop_prune_never_touches_fixed_slots(elapsed_secs in 0u64..1_000_000) {
            let timings = DirectoryTimings {
                entry_timeout: Duration::from_secs(60),
                ..Default::default()
            };
            let (directory, _) = central(timings);
            let start = Instant::now();
            directory.register_server_at(addr("1.2.3.4:5000"), info("A", 1), start);

            directory.prune_expired_at(start + Duration::from_secs(elapsed_secs));

            let entries = directory.entries();
            prop_assert!(entries.len() >= 2);
            prop_assert_eq!(&entries[0].info.name, "Central");
            prop_assert_eq!(&entries[1].info.name, "Peer");
            prop_assert_eq!(entries.len() == 3, elapsed_secs <= 60);
        }
    }
}
