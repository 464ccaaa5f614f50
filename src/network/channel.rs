//! Directory messages sent through the packet router's socket

use super::{HostAddress, RouterHandle};
use crate::protocol::{DirectoryMessage, MessageChannel};

/// [`MessageChannel`] that encodes messages and sends them from the
/// router's own socket, so replies come back through the same port
#[derive(Clone)]
pub struct RouterMessageChannel {
    handle: RouterHandle,
}

impl RouterMessageChannel {
    pub fn new(handle: RouterHandle) -> Self {
        Self { handle }
    }
}

impl MessageChannel for RouterMessageChannel {
    fn send(&self, to: HostAddress, message: DirectoryMessage) {
        let data = match message.serialize() {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Failed to encode {}: {}", message.kind(), e);
                return;
            }
        };

        if let Err(e) = self.handle.send(&data, to) {
            tracing::warn!("Failed to send {} to {}: {}", message.kind(), to, e);
        }
    }
}
