use std::{
    io,
    net::{SocketAddr, UdpSocket},
    thread::sleep,
    time::Duration,
};

use parking_lot::RwLock;
use relink_core::{
    config::Config,
    error::{ErrorKind, Result},
    transport::DatagramSocket,
};
use socket2::{Domain, Protocol, Socket as Socket2, Type};

/// Creates a UDP socket bound to `address` with the configured socket options.
fn bind_socket(address: SocketAddr, config: &Config) -> io::Result<UdpSocket> {
    let socket = Socket2::new(Domain::for_address(address), Type::DGRAM, Some(Protocol::UDP))?;

    if address.is_ipv6() {
        socket.set_only_v6(false)?;
    }

    // Apply receive buffer size
    if let Some(size) = config.socket_recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }

    // Apply send buffer size
    if let Some(size) = config.socket_send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }

    if let Some(ttl) = config.socket_ttl {
        if address.is_ipv6() {
            socket.set_unicast_hops_v6(ttl)?;
        } else {
            socket.set_ttl(ttl)?;
        }
    }

    socket.bind(&address.into())?;
    socket.set_read_timeout(Some(config.receive_timeout))?;
    Ok(socket.into())
}

/// UDP transport that can be bound after the connection threads have started.
///
/// The socket sits behind a read-write lock: sends and the (timed) receive share it,
/// binding replaces it.
#[derive(Debug)]
pub struct UdpTransport {
    socket: RwLock<Option<UdpSocket>>,
    /// How long an unbound receive waits before reporting `WouldBlock`
    idle_timeout: Duration,
}

impl UdpTransport {
    /// Creates an unbound transport.
    pub fn new(idle_timeout: Duration) -> Self {
        Self { socket: RwLock::new(None), idle_timeout }
    }

    /// Binds (or rebinds) the transport. Returns the bound address.
    pub fn bind(&self, address: SocketAddr, config: &Config) -> Result<SocketAddr> {
        let socket = bind_socket(address, config).map_err(ErrorKind::BindFailed)?;
        let local = socket.local_addr()?;
        *self.socket.write() = Some(socket);
        tracing::debug!("Bound UDP socket to {}", local);
        Ok(local)
    }

    /// Returns true once a socket is bound.
    pub fn is_bound(&self) -> bool {
        self.socket.read().is_some()
    }
}

fn not_bound() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is not bound")
}

impl DatagramSocket for UdpTransport {
    fn send_to(&self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        match self.socket.read().as_ref() {
            Some(socket) => socket.send_to(payload, addr),
            None => Err(not_bound()),
        }
    }

    fn recv_from(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        {
            let guard = self.socket.read();
            if let Some(socket) = guard.as_ref() {
                return socket.recv_from(buffer);
            }
        }
        sleep(self.idle_timeout);
        Err(io::Error::new(io::ErrorKind::WouldBlock, "socket is not bound"))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match self.socket.read().as_ref() {
            Some(socket) => socket.local_addr(),
            None => Err(not_bound()),
        }
    }
}
