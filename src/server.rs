//! Server core: separates directory traffic from audio traffic
//!
//! Every datagram that reaches a server-role router lands here. Directory
//! messages are answered by the [`ServerDirectory`]; everything else is
//! audio and goes to the wrapped consumer, whose verdict decides whether
//! the server loop is woken up. The split is made on the reserved
//! [`MESSAGE_MAGIC`](crate::protocol::MESSAGE_MAGIC) prefix.

use std::sync::Arc;

use crate::directory::ServerDirectory;
use crate::network::{HostAddress, ServerConsumer};
use crate::protocol::{DirectoryMessage, MessageChannel};

pub struct DirectoryServerCore<A> {
    directory: Arc<ServerDirectory>,
    channel: Arc<dyn MessageChannel>,
    audio: A,
}

impl<A: ServerConsumer> DirectoryServerCore<A> {
    pub fn new(directory: Arc<ServerDirectory>, channel: Arc<dyn MessageChannel>, audio: A) -> Self {
        Self {
            directory,
            channel,
            audio,
        }
    }

    pub fn directory(&self) -> &Arc<ServerDirectory> {
        &self.directory
    }

    fn handle_message(&self, message: DirectoryMessage, from: HostAddress) {
        tracing::trace!("Directory message '{}' from {}", message.kind(), from);

        match message {
            DirectoryMessage::RegisterServer(info) => self.directory.register_server(from, info),
            DirectoryMessage::UnregisterServer => self.directory.unregister_server(from),
            DirectoryMessage::QueryServerList => {
                self.directory.query_list(from);
            }
            DirectoryMessage::RequestEmptyMessage { target } => {
                self.channel.send(target, DirectoryMessage::EmptyKeepAlive);
            }
            DirectoryMessage::EmptyKeepAlive | DirectoryMessage::ServerList(_) => {}
        }
    }
}

impl<A: ServerConsumer> ServerConsumer for DirectoryServerCore<A> {
    fn put_data(&self, data: &[u8], from: HostAddress) -> bool {
        match DirectoryMessage::deserialize(data) {
            Some(message) => {
                self.handle_message(message, from);
                false
            }
            None => self.audio.put_data(data, from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryTimings;
    use crate::directory::tests::{directory_with, RecordingChannel};
    use crate::directory::ServerInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingAudio {
        packets: AtomicUsize,
    }

    impl ServerConsumer for Arc<CountingAudio> {
        fn put_data(&self, _data: &[u8], _from: HostAddress) -> bool {
            self.packets.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn core() -> (
        DirectoryServerCore<Arc<CountingAudio>>,
        Arc<RecordingChannel>,
        Arc<CountingAudio>,
    ) {
        let (directory, channel) = directory_with("Central;Berlin;5", "localhost", DirectoryTimings::default());
        let audio = Arc::new(CountingAudio::default());
        let core = DirectoryServerCore::new(Arc::new(directory), channel.clone(), audio.clone());
        (core, channel, audio)
    }

    fn wire(message: DirectoryMessage) -> Vec<u8> {
        message.serialize().unwrap().to_vec()
    }

    #[test]
    fn test_registration_over_the_wire() {
        let (core, _, audio) = core();
        let from = HostAddress::parse("1.2.3.4:5000").unwrap();
        let info = ServerInfo {
            name: "Remote".to_string(),
            local_port: 22124,
            ..Default::default()
        };

        assert!(!core.put_data(&wire(DirectoryMessage::RegisterServer(info)), from));
        assert_eq!(core.directory().len(), 2);
        assert_eq!(core.directory().entries()[1].info.name, "Remote");

        assert!(!core.put_data(&wire(DirectoryMessage::UnregisterServer), from));
        assert_eq!(core.directory().len(), 1);
        assert_eq!(audio.packets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_query_answered_to_sender() {
        let (core, channel, _) = core();
        let from = HostAddress::parse("1.2.3.4:5000").unwrap();

        core.put_data(&wire(DirectoryMessage::QueryServerList), from);

        let sent = channel.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, from);
        assert!(matches!(&sent[0].1, DirectoryMessage::ServerList(items) if items.len() == 1));
    }

    #[test]
    fn test_hole_punch_request() {
        let (core, channel, _) = core();
        let target = HostAddress::parse("8.8.4.4:22134").unwrap();

        core.put_data(
            &wire(DirectoryMessage::RequestEmptyMessage { target }),
            HostAddress::parse("10.0.0.1:22124").unwrap(),
        );

        assert_eq!(channel.take(), vec![(target, DirectoryMessage::EmptyKeepAlive)]);
    }

    #[test]
    fn test_audio_passes_through() {
        let (core, channel, audio) = core();

        assert!(core.put_data(&[0x01, 0xAF, 0, 0, 0, 0], HostAddress::localhost(1)));
        assert_eq!(audio.packets.load(Ordering::SeqCst), 1);
        assert!(channel.take().is_empty());
    }

    #[test]
    fn test_reserved_prefix_belongs_to_directory() {
        let (core, _, audio) = core();
        let prefix = crate::protocol::MESSAGE_MAGIC.to_le_bytes();

        // shortest keep-alive: the prefix plus the variant tag
        assert!(!core.put_data(&[prefix[0], prefix[1], 0x00], HostAddress::localhost(1)));
        assert_eq!(audio.packets.load(Ordering::SeqCst), 0);

        // prefix with a body that is not a directory message stays audio
        assert!(core.put_data(&[prefix[0], prefix[1], 0xFF, 0xFF], HostAddress::localhost(1)));
        assert_eq!(audio.packets.load(Ordering::SeqCst), 1);
    }
}
