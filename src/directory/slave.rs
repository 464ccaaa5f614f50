//! Slave server role: registration at the central server and NAT keep-alive

use super::{DirectoryRole, ServerDirectory};
use crate::protocol::DirectoryMessage;

impl ServerDirectory {
    /// Register this server at the central server, or unregister it.
    ///
    /// The central address is resolved on every call since it may be a
    /// dynamic DNS name. Resolution runs without the list lock held. A
    /// failed resolution is silently skipped; the next registration tick
    /// retries.
    pub fn register_with_central(&self, is_registering: bool) {
        let central_address = {
            let state = self.state.lock();
            if state.role != DirectoryRole::Slave {
                return;
            }
            state.central_address.clone()
        };

        let central = match (self.resolver)(&central_address) {
            Some(central) => central,
            None => {
                tracing::debug!("Cannot resolve central server '{}'", central_address);
                return;
            }
        };

        let mut state = self.state.lock();
        // the address may have changed while resolving
        if state.role != DirectoryRole::Slave || state.central_address != central_address {
            return;
        }
        state.central_host = central;

        let message = if is_registering {
            match state.entries.first() {
                Some(own) => DirectoryMessage::RegisterServer(own.info.clone()),
                None => return,
            }
        } else {
            DirectoryMessage::UnregisterServer
        };

        tracing::debug!("Sending {} to central server {}", message.kind(), central);
        self.channel.send(central, message);
    }

    /// Keep the NAT port towards the central server open
    pub fn ping_central(&self) {
        let state = self.state.lock();
        if !state.central_host.is_unset() {
            self.channel.send(state.central_host, DirectoryMessage::EmptyKeepAlive);
        }
    }
}
