//! State shared by the application handle and both connection threads.

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, AtomicU16, Ordering},
};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use relink_core::{
    config::Config,
    constants::{PEER_ID_INEXISTENT, PEER_ID_SERVER},
    interceptor::Interceptor,
    transport::DatagramSocket,
};

use crate::{
    event_types::{ConnectionCommand, ConnectionEvent},
    peer_table::PeerTable,
    socket::UdpTransport,
};

pub(crate) struct SharedState {
    pub config: Config,
    pub peers: PeerTable,
    pub transport: UdpTransport,
    interceptor: Mutex<Box<dyn Interceptor>>,
    events: Sender<ConnectionEvent>,
    commands: Sender<ConnectionCommand>,
    wake: Sender<()>,
    local_peer_id: AtomicU16,
    shutdown: AtomicBool,
}

impl SharedState {
    pub fn new(
        config: Config,
        interceptor: Box<dyn Interceptor>,
        events: Sender<ConnectionEvent>,
        commands: Sender<ConnectionCommand>,
        wake: Sender<()>,
    ) -> Self {
        Self {
            transport: UdpTransport::new(config.receive_timeout),
            config,
            peers: PeerTable::new(),
            interceptor: Mutex::new(interceptor),
            events,
            commands,
            wake,
            local_peer_id: AtomicU16::new(PEER_ID_INEXISTENT),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn local_peer_id(&self) -> u16 {
        self.local_peer_id.load(Ordering::Acquire)
    }

    pub fn set_local_peer_id(&self, peer_id: u16) {
        self.local_peer_id.store(peer_id, Ordering::Release);
    }

    pub fn is_server(&self) -> bool {
        self.local_peer_id() == PEER_ID_SERVER
    }

    /// `"<local peer id>/<local address>"`, the prefix of every connection log line.
    pub fn describe(&self) -> String {
        match self.transport.local_addr() {
            Ok(addr) => format!("{}/{}", self.local_peer_id(), addr),
            Err(_) => format!("{}/unbound", self.local_peer_id()),
        }
    }

    pub fn push_event(&self, event: ConnectionEvent) {
        // The application may have dropped its receiver while shutting down.
        let _ = self.events.send(event);
    }

    pub fn put_command(&self, command: ConnectionCommand) {
        let _ = self.commands.send(command);
        self.wake_send_thread();
    }

    pub fn wake_send_thread(&self) {
        let _ = self.wake.try_send(());
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake_send_thread();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Runs the interceptor over a datagram and writes it to the socket.
    pub fn raw_send(&self, address: &SocketAddr, mut datagram: Vec<u8>) {
        if !self.interceptor.lock().on_send(address, &mut datagram) {
            return;
        }
        if let Err(err) = self.transport.send_to(address, &datagram) {
            tracing::error!("{}: error sending a datagram to {}: {}", self.describe(), address, err);
        }
    }

    /// Runs the interceptor over a received datagram. Returns false to drop it.
    pub fn intercept_receive(&self, address: &SocketAddr, datagram: &mut [u8]) -> bool {
        self.interceptor.lock().on_receive(address, datagram)
    }

    /// Removes a peer and reports it. Returns false if the peer was already gone.
    pub fn delete_peer(&self, peer_id: u16, timeout: bool) -> bool {
        let Some(peer) = self.peers.remove(peer_id) else {
            return false;
        };
        tracing::debug!(
            "{}: removed peer {} at {} (timeout: {})",
            self.describe(),
            peer_id,
            peer.address(),
            timeout
        );
        self.push_event(ConnectionEvent::PeerRemoved { peer_id, timeout, address: peer.address() });
        true
    }
}
