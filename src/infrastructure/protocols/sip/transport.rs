//! SIP transport layer - listening sockets and per-leg TCP/UDP connections
//!
//! All socket activity is funnelled into one event stream consumed by the
//! relay task. Reader tasks only forward bytes; every decision is taken by
//! the consumer of [`Transport::next_event`].

use crate::domain::shared::{Handle, ProxyError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Read size for one TCP read or UDP datagram
const RECV_BUFFER_SIZE: usize = 65535;

/// Bound on queued events between reader tasks and the relay
const EVENT_QUEUE_SIZE: usize = 1024;

/// Outbound connection attempts are abandoned after this long
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause before retrying a listener after descriptor or memory exhaustion
const LISTENER_BACKOFF: Duration = Duration::from_millis(100);

// Raw errno values for listener errors that `io::ErrorKind` does not name.
const EBADF: i32 = 9;
const ENOMEM: i32 = 12;
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

/// Transport event delivered to the relay
#[derive(Debug)]
pub enum TransportEvent {
    /// Inbound TCP connection on the listening socket
    Accepted {
        handle: Handle,
        peer: SocketAddrV4,
        local: SocketAddrV4,
    },
    /// Datagram received on the shared UDP listening socket
    Datagram {
        peer: SocketAddrV4,
        local: SocketAddrV4,
        bytes: Bytes,
    },
    /// Bytes received on an established leg
    Data { handle: Handle, bytes: Bytes },
    /// Peer closed the leg
    Closed { handle: Handle },
    /// Read error on the leg
    Failed { handle: Handle, error: io::Error },
    /// A listening socket failed; the process cannot continue
    ListenerFailed { error: io::Error },
}

impl TransportEvent {
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Self::Accepted { handle, .. }
            | Self::Data { handle, .. }
            | Self::Closed { handle }
            | Self::Failed { handle, .. } => Some(*handle),
            Self::Datagram { .. } | Self::ListenerFailed { .. } => None,
        }
    }
}

/// Newly established outbound leg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub handle: Handle,
    pub local: SocketAddrV4,
}

/// Transport layer trait
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Wait for the next event; `None` once the transport is shut down.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Open a TCP leg to `target`.
    async fn connect_tcp(&mut self, target: SocketAddrV4) -> Result<Link>;

    /// Open a connected UDP leg to `target`, optionally bound to `source`.
    ///
    /// Binding to the local address of the shared listener makes the kernel
    /// deliver the peer's further datagrams to this leg.
    async fn connect_udp(
        &mut self,
        target: SocketAddrV4,
        source: Option<SocketAddrV4>,
    ) -> Result<Link>;

    /// Send all bytes on a leg.
    async fn send(&mut self, handle: Handle, bytes: &[u8]) -> Result<()>;

    /// Close a leg. Unknown handles are ignored.
    fn close(&mut self, handle: Handle);
}

enum Writer {
    Tcp(OwnedWriteHalf),
    Udp(Arc<UdpSocket>),
}

struct Leg {
    writer: Writer,
    reader: JoinHandle<()>,
}

/// Messages from the listener and reader tasks
enum Inbound {
    Event(TransportEvent),
    Accepted { stream: TcpStream, peer: SocketAddr },
}

/// Tokio socket transport
pub struct TokioTransport {
    tx: mpsc::Sender<Inbound>,
    rx: mpsc::Receiver<Inbound>,
    legs: HashMap<Handle, Leg>,
    next_handle: u64,
    listeners: Vec<JoinHandle<()>>,
    tcp_local: SocketAddrV4,
    udp_local: SocketAddrV4,
}

impl TokioTransport {
    /// Bind the TCP and UDP listening sockets and start serving them.
    pub async fn bind(tcp: SocketAddrV4, udp: SocketAddrV4) -> Result<Self> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_SIZE);

        let listener = TcpListener::bind(tcp).await?;
        let tcp_local = local_v4(listener.local_addr()?)?;
        info!("TCP transport listening on {}", tcp_local);

        let socket = udp_socket(udp)?;
        let udp_local = local_v4(socket.local_addr()?)?;
        info!("UDP transport listening on {}", udp_local);

        let listeners = vec![
            tokio::spawn(Self::accept_loop(listener, tx.clone())),
            tokio::spawn(Self::datagram_loop(Arc::new(socket), udp_local, tx.clone())),
        ];

        Ok(Self {
            tx,
            rx,
            legs: HashMap::new(),
            next_handle: 0,
            listeners,
            tcp_local,
            udp_local,
        })
    }

    pub fn tcp_local_addr(&self) -> SocketAddrV4 {
        self.tcp_local
    }

    pub fn udp_local_addr(&self) -> SocketAddrV4 {
        self.udp_local
    }

    fn allocate_handle(&mut self) -> Handle {
        self.next_handle += 1;
        Handle::new(self.next_handle)
    }

    fn register_tcp(&mut self, stream: TcpStream) -> Handle {
        let handle = self.allocate_handle();
        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(Self::stream_loop(handle, read_half, self.tx.clone()));

        self.legs.insert(
            handle,
            Leg {
                writer: Writer::Tcp(write_half),
                reader,
            },
        );
        handle
    }

    fn register_udp(&mut self, socket: UdpSocket) -> Handle {
        let handle = self.allocate_handle();
        let socket = Arc::new(socket);
        let reader = tokio::spawn(Self::connected_datagram_loop(
            handle,
            socket.clone(),
            self.tx.clone(),
        ));

        self.legs.insert(
            handle,
            Leg {
                writer: Writer::Udp(socket),
                reader,
            },
        );
        handle
    }

    async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Inbound>) {
        loop {
            let inbound = match listener.accept().await {
                Ok((stream, peer)) => Inbound::Accepted { stream, peer },
                Err(error) => {
                    debug!("Failed to accept TCP connection: {}", error);
                    if recover_listener(error, &tx).await {
                        continue;
                    }
                    break;
                }
            };

            if tx.send(inbound).await.is_err() {
                break;
            }
        }
    }

    async fn datagram_loop(socket: Arc<UdpSocket>, local: SocketAddrV4, tx: mpsc::Sender<Inbound>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let event = match socket.recv_from(&mut buf).await {
                Ok((size, SocketAddr::V4(peer))) => {
                    trace!("Received {} bytes from {} via UDP", size, peer);
                    TransportEvent::Datagram {
                        peer,
                        local,
                        bytes: Bytes::copy_from_slice(&buf[..size]),
                    }
                }
                Ok((_, peer)) => {
                    debug!("Ignoring datagram from non-IPv4 peer {}", peer);
                    continue;
                }
                Err(error) => {
                    debug!("Failed to receive UDP packet: {}", error);
                    if recover_listener(error, &tx).await {
                        continue;
                    }
                    break;
                }
            };

            if tx.send(Inbound::Event(event)).await.is_err() {
                break;
            }
        }
    }

    async fn stream_loop(
        handle: Handle,
        mut stream: tokio::net::tcp::OwnedReadHalf,
        tx: mpsc::Sender<Inbound>,
    ) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let (event, done) = match stream.read(&mut buf).await {
                Ok(0) => (TransportEvent::Closed { handle }, true),
                Ok(size) => (
                    TransportEvent::Data {
                        handle,
                        bytes: Bytes::copy_from_slice(&buf[..size]),
                    },
                    false,
                ),
                Err(error) => (TransportEvent::Failed { handle, error }, true),
            };

            if tx.send(Inbound::Event(event)).await.is_err() || done {
                break;
            }
        }
    }

    async fn connected_datagram_loop(handle: Handle, socket: Arc<UdpSocket>, tx: mpsc::Sender<Inbound>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let (event, done) = match socket.recv(&mut buf).await {
                Ok(size) => (
                    TransportEvent::Data {
                        handle,
                        bytes: Bytes::copy_from_slice(&buf[..size]),
                    },
                    false,
                ),
                Err(error) => (TransportEvent::Failed { handle, error }, true),
            };

            if tx.send(Inbound::Event(event)).await.is_err() || done {
                break;
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for TokioTransport {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            match self.rx.recv().await? {
                Inbound::Accepted { stream, peer } => {
                    let (SocketAddr::V4(peer), Ok(SocketAddr::V4(local))) =
                        (peer, stream.local_addr())
                    else {
                        debug!("Dropping non-IPv4 TCP connection from {}", peer);
                        continue;
                    };

                    let handle = self.register_tcp(stream);
                    return Some(TransportEvent::Accepted {
                        handle,
                        peer,
                        local,
                    });
                }
                Inbound::Event(event) => {
                    // Reader tasks may still deliver for legs closed meanwhile.
                    if let Some(handle) = event.handle() {
                        if !self.legs.contains_key(&handle) {
                            continue;
                        }
                        if matches!(
                            event,
                            TransportEvent::Closed { .. } | TransportEvent::Failed { .. }
                        ) {
                            self.close(handle);
                        }
                    }
                    return Some(event);
                }
            }
        }
    }

    async fn connect_tcp(&mut self, target: SocketAddrV4) -> Result<Link> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(target))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TCP connect timed out"))??;
        let local = local_v4(stream.local_addr()?)?;

        let handle = self.register_tcp(stream);
        debug!("TCP leg {} connected {} -> {}", handle, local, target);
        Ok(Link { handle, local })
    }

    async fn connect_udp(
        &mut self,
        target: SocketAddrV4,
        source: Option<SocketAddrV4>,
    ) -> Result<Link> {
        let bind = source.unwrap_or(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        let socket = udp_socket(bind)?;
        socket.connect(target).await?;
        let local = local_v4(socket.local_addr()?)?;

        let handle = self.register_udp(socket);
        debug!("UDP leg {} connected {} -> {}", handle, local, target);
        Ok(Link { handle, local })
    }

    async fn send(&mut self, handle: Handle, bytes: &[u8]) -> Result<()> {
        let leg = self
            .legs
            .get_mut(&handle)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, format!("leg {} is closed", handle)))?;

        match &mut leg.writer {
            Writer::Tcp(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await?;
            }
            Writer::Udp(socket) => {
                let sent = socket.send(bytes).await?;
                if sent != bytes.len() {
                    return Err(ProxyError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short datagram ({} of {} bytes)", sent, bytes.len()),
                    )));
                }
            }
        }

        Ok(())
    }

    fn close(&mut self, handle: Handle) {
        if let Some(leg) = self.legs.remove(&handle) {
            leg.reader.abort();
            trace!("Leg {} closed", handle);
        }
    }
}

impl Drop for TokioTransport {
    fn drop(&mut self) {
        for task in &self.listeners {
            task.abort();
        }
        for leg in self.legs.values() {
            leg.reader.abort();
        }
    }
}

/// Non-blocking UDP socket with address reuse, so per-session sockets can
/// share the listening port.
fn udp_socket(bind: SocketAddrV4) -> Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&socket2::SockAddr::from(bind))?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

fn local_v4(addr: SocketAddr) -> Result<SocketAddrV4> {
    match addr {
        SocketAddr::V4(addr) => Ok(addr),
        SocketAddr::V6(addr) => Err(ProxyError::configuration(format!(
            "IPv6 address {} not supported",
            addr
        ))),
    }
}

/// What a listening task does after a receive or accept error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerErrorAction {
    /// Per-connection or per-datagram failure, keep listening
    Retry,
    /// Resource exhaustion, pause and keep listening
    Backoff,
    /// The listening socket itself is unusable
    Fatal,
}

fn listener_error_action(error: &io::Error) -> ListenerErrorAction {
    match error.raw_os_error() {
        Some(EMFILE | ENFILE | ENOMEM) => return ListenerErrorAction::Backoff,
        Some(EBADF) => return ListenerErrorAction::Fatal,
        _ => {}
    }

    match error.kind() {
        io::ErrorKind::OutOfMemory => ListenerErrorAction::Backoff,
        io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected => ListenerErrorAction::Fatal,
        _ => ListenerErrorAction::Retry,
    }
}

/// Handle a listener error. Returns whether the listener should keep going.
///
/// Only a fatal error is reported to the relay as `ListenerFailed`.
async fn recover_listener(error: io::Error, tx: &mpsc::Sender<Inbound>) -> bool {
    match listener_error_action(&error) {
        ListenerErrorAction::Retry => true,
        ListenerErrorAction::Backoff => {
            error!("Listener out of resources, pausing: {}", error);
            tokio::time::sleep(LISTENER_BACKOFF).await;
            true
        }
        ListenerErrorAction::Fatal => {
            error!("Listener failed: {}", error);
            let _ = tx
                .send(Inbound::Event(TransportEvent::ListenerFailed { error }))
                .await;
            false
        }
    }
}
