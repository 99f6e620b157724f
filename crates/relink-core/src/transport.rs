//! Transport abstraction for pluggable datagram I/O.

use std::{io::Result, net::SocketAddr};

/// Datagram socket the connection threads talk through.
///
/// Both the send thread and the receive thread hold the same transport, so every
/// method takes `&self`; implementations synchronize internally. A transport may be
/// unbound for a while (a connection exists before `serve` or `connect`), in which
/// case sends fail with `NotConnected` and receives report `WouldBlock` after
/// waiting for the configured timeout.
pub trait DatagramSocket: Send + Sync {
    /// Sends one datagram to `addr`.
    fn send_to(&self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives one datagram, waiting at most the transport's read timeout.
    fn recv_from(&self, buffer: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Returns the local address, or an error while unbound.
    fn local_addr(&self) -> Result<SocketAddr>;
}
