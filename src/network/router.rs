//! Packet router: the single UDP socket of a client or a server
//!
//! Every inbound datagram is read under the router lock, copied out of the
//! shared receive buffer and then dispatched without holding the lock:
//!
//! ```text
//!   socket ──▶ [recv buffer]──copy──▶ dispatcher
//!                   ▲                   ├─ client: sender == channel ? put_data : invalid packet
//!   send() ─────────┘ (same lock)       └─ server: core.put_data ──audio──▶ wake queue
//! ```

use bytes::Bytes;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::constants::SERVER_EVENT_QUEUE;
use crate::error::NetworkError;
use crate::network::address::HostAddress;
use crate::network::udp::bind_for_role;

/// Which side of the conference owns the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterRole {
    Client,
    Server,
}

/// Result of handing a datagram to a client channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutDataStatus {
    AudioOk,
    AudioError,
    ProtocolOk,
    ProtocolError,
    GeneralError,
}

/// Delivery outcome reported to the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Ok,
    AudioError,
    ProtocolError,
    Other,
}

impl From<PutDataStatus> for DeliveryStatus {
    fn from(status: PutDataStatus) -> Self {
        match status {
            PutDataStatus::AudioOk => Self::Ok,
            PutDataStatus::AudioError | PutDataStatus::GeneralError => Self::AudioError,
            PutDataStatus::ProtocolError => Self::ProtocolError,
            PutDataStatus::ProtocolOk => Self::Other,
        }
    }
}

/// Client-side audio channel fed by the router
pub trait ChannelConsumer: Send + Sync {
    /// Remote endpoint this channel talks to
    fn address(&self) -> HostAddress;

    fn is_enabled(&self) -> bool;

    fn put_data(&self, data: &[u8]) -> PutDataStatus;
}

/// Server-side core fed by the router
pub trait ServerConsumer: Send + Sync {
    /// Returns `true` when the datagram was audio traffic
    fn put_data(&self, data: &[u8], from: HostAddress) -> bool;
}

/// Receives client-side delivery notifications
pub trait RouterObserver: Send + Sync {
    fn on_delivery(&self, status: DeliveryStatus);

    fn on_invalid_packet(&self, data: &[u8], from: HostAddress);

    /// The router is stopping; a pending notification must not block it
    fn on_shutdown(&self) {}
}

/// Wake-up reasons posted to the server processing loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    PacketReceived,
}

/// Client-side notification as queued by [`QueuedObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    Delivery(DeliveryStatus),
    InvalidPacket { data: Bytes, from: HostAddress },
}

/// Observer that hands notifications to another context in arrival order.
/// The send blocks when the queue is full, so the receive thread never runs
/// ahead of the consumer by more than `capacity` events. Once the router
/// shuts down, pending and further events are dropped.
pub struct QueuedObserver {
    tx: Sender<RouterEvent>,
    closed: AtomicBool,
}

/// How often a blocked hand-off checks for shutdown
const HANDOFF_POLL: Duration = Duration::from_millis(10);

impl QueuedObserver {
    pub fn new(capacity: usize) -> (Self, Receiver<RouterEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let observer = Self {
            tx,
            closed: AtomicBool::new(false),
        };
        (observer, rx)
    }

    fn push(&self, mut event: RouterEvent) {
        while !self.closed.load(Ordering::Acquire) {
            match self.tx.send_timeout(event, HANDOFF_POLL) {
                Ok(()) | Err(SendTimeoutError::Disconnected(_)) => return,
                Err(SendTimeoutError::Timeout(back)) => event = back,
            }
        }
    }
}

impl RouterObserver for QueuedObserver {
    fn on_delivery(&self, status: DeliveryStatus) {
        self.push(RouterEvent::Delivery(status));
    }

    fn on_invalid_packet(&self, data: &[u8], from: HostAddress) {
        self.push(RouterEvent::InvalidPacket {
            data: Bytes::copy_from_slice(data),
            from,
        });
    }

    fn on_shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Destination of demultiplexed datagrams
#[derive(Clone)]
pub enum Dispatcher {
    Client {
        channel: Arc<dyn ChannelConsumer>,
        observer: Arc<dyn RouterObserver>,
    },
    Server {
        core: Arc<dyn ServerConsumer>,
        wake: Sender<ServerEvent>,
    },
}

impl Dispatcher {
    /// Server dispatcher with a fresh wake-up queue
    pub fn server(core: Arc<dyn ServerConsumer>) -> (Self, Receiver<ServerEvent>) {
        let (wake, rx) = crossbeam_channel::bounded(SERVER_EVENT_QUEUE);
        (Self::Server { core, wake }, rx)
    }

    pub fn client(channel: Arc<dyn ChannelConsumer>, observer: Arc<dyn RouterObserver>) -> Self {
        Self::Client { channel, observer }
    }

    pub fn role(&self) -> RouterRole {
        match self {
            Self::Client { .. } => RouterRole::Client,
            Self::Server { .. } => RouterRole::Server,
        }
    }
}

/// Router traffic counters
#[derive(Debug, Clone, Default)]
pub struct RouterStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub invalid_packets: u64,
}

struct RouterShared {
    socket: StdUdpSocket,
    local_addr: SocketAddr,
    /// Guards the receive buffer and serializes socket writes against it
    recv_buffer: Mutex<Vec<u8>>,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    invalid_packets: AtomicU64,
}

impl RouterShared {
    fn send(&self, data: &[u8], to: HostAddress) -> Result<(), NetworkError> {
        if data.is_empty() {
            return Ok(());
        }

        let buffer = self.recv_buffer.lock();
        if data.len() > buffer.len() {
            return Err(NetworkError::PacketTooLarge(data.len()));
        }
        let sent = self
            .socket
            .send_to(data, to.socket_addr())
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        drop(buffer);

        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Read one pending datagram; `Ok(None)` when the socket is drained
    fn read_datagram(&self) -> std::io::Result<Option<(Bytes, HostAddress)>> {
        let mut buffer = self.recv_buffer.lock();
        match self.socket.recv_from(&mut buffer) {
            Ok((size, addr)) => Ok(Some((Bytes::copy_from_slice(&buffer[..size]), addr.into()))),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Drain all pending datagrams into `dispatcher`, returns how many were read
    fn drain(&self, dispatcher: &Dispatcher) -> usize {
        let mut processed = 0;

        loop {
            let (data, from) = match self.read_datagram() {
                Ok(Some(datagram)) => datagram,
                Ok(None) => break,
                Err(e) => {
                    tracing::trace!("Dropping unreadable datagram: {}", e);
                    break;
                }
            };

            processed += 1;
            self.packets_received.fetch_add(1, Ordering::Relaxed);
            self.bytes_received.fetch_add(data.len() as u64, Ordering::Relaxed);

            match dispatcher {
                Dispatcher::Client { channel, observer } => {
                    if channel.address() == from && channel.is_enabled() {
                        observer.on_delivery(channel.put_data(&data).into());
                    } else {
                        self.invalid_packets.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!("Invalid packet of {} bytes from {}", data.len(), from);
                        observer.on_invalid_packet(&data, from);
                    }
                }
                Dispatcher::Server { core, wake } => {
                    if core.put_data(&data, from) {
                        match wake.try_send(ServerEvent::PacketReceived) {
                            // a full queue already holds a pending wake-up
                            Ok(()) | Err(TrySendError::Full(_)) => {}
                            Err(TrySendError::Disconnected(_)) => {
                                tracing::trace!("Server wake-up queue closed");
                            }
                        }
                    }
                }
            }
        }

        processed
    }
}

/// Cheap cloneable send-only view of a [`PacketRouter`]
#[derive(Clone)]
pub struct RouterHandle {
    shared: Arc<RouterShared>,
}

impl RouterHandle {
    /// Send `data` to `to`; an empty payload is a no-op
    pub fn send(&self, data: &[u8], to: HostAddress) -> Result<(), NetworkError> {
        self.shared.send(data, to)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }
}

/// Owner of the UDP socket and of the receive thread
pub struct PacketRouter {
    shared: Arc<RouterShared>,
    role: RouterRole,
    running: Arc<AtomicBool>,
    observer: Option<Arc<dyn RouterObserver>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PacketRouter {
    /// Bind the socket for `role`. Failing to bind is the only fatal error
    /// of the transport layer.
    pub fn bind(config: &NetworkConfig, role: RouterRole) -> Result<Self, NetworkError> {
        let socket = bind_for_role(config, role)?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed {
                port: config.port,
                reason: e.to_string(),
            })?;

        tracing::info!("{:?} socket bound to {}", role, local_addr);

        Ok(Self {
            shared: Arc::new(RouterShared {
                socket,
                local_addr,
                recv_buffer: Mutex::new(vec![0u8; config.max_datagram_size]),
                packets_sent: AtomicU64::new(0),
                bytes_sent: AtomicU64::new(0),
                packets_received: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                invalid_packets: AtomicU64::new(0),
            }),
            role,
            running: Arc::new(AtomicBool::new(false)),
            observer: None,
            thread_handle: None,
        })
    }

    pub fn role(&self) -> RouterRole {
        self.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn handle(&self) -> RouterHandle {
        RouterHandle {
            shared: self.shared.clone(),
        }
    }

    /// Send `data` to `to`; an empty payload is a no-op
    pub fn send(&self, data: &[u8], to: HostAddress) -> Result<(), NetworkError> {
        self.shared.send(data, to)
    }

    /// Process every datagram that is ready right now. Called by the receive
    /// thread, or directly by an external event loop that owns readiness.
    pub fn on_receive(&self, dispatcher: &Dispatcher) -> Result<usize, NetworkError> {
        if dispatcher.role() != self.role {
            return Err(NetworkError::RoleMismatch);
        }
        Ok(self.shared.drain(dispatcher))
    }

    /// Start the receive thread
    pub fn start(&mut self, dispatcher: Dispatcher) -> Result<(), NetworkError> {
        if dispatcher.role() != self.role {
            return Err(NetworkError::RoleMismatch);
        }
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Dispatcher::Client { observer, .. } = &dispatcher {
            self.observer = Some(observer.clone());
        }

        let running = self.running.clone();
        let shared = self.shared.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("packet-router".to_string())
            .spawn(move || {
                // Adaptive backoff for empty reads
                let mut empty_reads = 0u32;
                const MAX_EMPTY_READS: u32 = 100;

                while running.load(Ordering::Relaxed) {
                    if shared.drain(&dispatcher) > 0 {
                        empty_reads = 0;
                        continue;
                    }

                    empty_reads = empty_reads.saturating_add(1);
                    if empty_reads < 10 {
                        std::hint::spin_loop();
                    } else if empty_reads < MAX_EMPTY_READS {
                        thread::yield_now();
                    } else {
                        thread::sleep(Duration::from_micros(50));
                    }
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                NetworkError::ReceiveFailed(e.to_string())
            })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the receive thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        // unblock a hand-off waiting on a consumer that stopped draining
        if let Some(observer) = self.observer.take() {
            observer.on_shutdown();
        }

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            packets_sent: self.shared.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.shared.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.shared.packets_received.load(Ordering::Relaxed),
            bytes_received: self.shared.bytes_received.load(Ordering::Relaxed),
            invalid_packets: self.shared.invalid_packets.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PacketRouter {
    fn drop(&mut self) {
        self.stop();
    }
}
