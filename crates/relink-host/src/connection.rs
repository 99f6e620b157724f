use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    thread::{Builder, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use relink_core::{
    config::Config,
    constants::{CHANNEL_COUNT, PEER_ID_INEXISTENT, PEER_ID_SERVER},
    error::{ErrorKind, Result},
    interceptor::{Interceptor, NoOpInterceptor},
    transport::DatagramSocket,
};
use relink_peer::ChannelStats;
use tracing::debug;

use crate::{
    event_types::{ConnectionCommand, ConnectionEvent},
    peer_handler::PeerHandler,
    receive_thread::ReceiveThread,
    send_thread::SendThread,
    state::SharedState,
};

/// Most chunks a payload can be split into; the chunk count travels as a `u16`.
const MAX_SPLIT_CHUNKS: usize = u16::MAX as usize;

/// A reliable, multi-channel UDP endpoint: a server with many peers, or a client
/// with the single server peer (id 1).
///
/// Creating a connection starts its send and receive threads. Methods only queue
/// commands and read events; dropping the connection stops and joins the threads.
///
/// # Examples
/// ```no_run
/// use std::time::Duration;
/// use relink_core::config::Config;
/// use relink_host::{Connection, ConnectionEvent};
///
/// let server = Connection::new(Config::default()).unwrap();
/// server.serve(30000);
///
/// while let Some(event) = server.wait_event(Duration::from_millis(100)) {
///     if let ConnectionEvent::DataReceived { peer_id, data } = event {
///         server.send(peer_id, 0, &data, true).unwrap();
///     }
/// }
/// ```
pub struct Connection {
    shared: Arc<SharedState>,
    events: Receiver<ConnectionEvent>,
    peer_handler: Option<Box<dyn PeerHandler>>,
    /// How long `receive` waits
    timeout: Duration,
    send_thread: Option<JoinHandle<()>>,
    receive_thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("description", &self.describe())
            .field("peers", &self.shared.peers)
            .field("timeout", &self.timeout)
            .field("peer_handler", &self.peer_handler.as_ref().map(|_| "<handler>"))
            .finish()
    }
}

impl Connection {
    /// Creates a connection and starts its threads. The socket is bound later, by
    /// [`serve`](Self::serve) or [`connect`](Self::connect).
    pub fn new(config: Config) -> Result<Self> {
        Self::with_interceptor(config, Box::new(NoOpInterceptor))
    }

    /// Creates a connection that runs every datagram through `interceptor`.
    pub fn with_interceptor(config: Config, interceptor: Box<dyn Interceptor>) -> Result<Self> {
        config.validate()?;

        let (event_sender, events) = unbounded();
        let (command_sender, commands) = unbounded();
        // One pending wake-up is enough to get the send thread going again.
        let (wake_sender, wake) = bounded(1);

        let shared = Arc::new(SharedState::new(config, interceptor, event_sender, command_sender, wake_sender));

        let send = SendThread::new(Arc::clone(&shared), commands, wake);
        let send_thread = Builder::new().name("relink-send".into()).spawn(move || send.run())?;

        let receive = ReceiveThread::new(Arc::clone(&shared));
        let receive_thread = match Builder::new().name("relink-receive".into()).spawn(move || receive.run()) {
            Ok(handle) => handle,
            Err(err) => {
                shared.request_shutdown();
                let _ = send_thread.join();
                return Err(err.into());
            }
        };

        Ok(Self {
            shared,
            events,
            peer_handler: None,
            timeout: Duration::ZERO,
            send_thread: Some(send_thread),
            receive_thread: Some(receive_thread),
        })
    }

    /// Creates a connection whose [`receive`](Self::receive) reports peer additions and
    /// removals to `handler`.
    pub fn with_peer_handler(config: Config, handler: Box<dyn PeerHandler>) -> Result<Self> {
        let mut connection = Self::new(config)?;
        connection.peer_handler = Some(handler);
        Ok(connection)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Binds the wildcard address on `port` and starts serving. A bind failure is
    /// reported as [`ConnectionEvent::BindFailed`].
    pub fn serve(&self, port: u16) {
        let address = if self.shared.config.ipv6 {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))
        } else {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
        };
        self.shared.put_command(ConnectionCommand::Serve { address });
    }

    /// Connects to the server at `address`. The server becomes peer 1 right away;
    /// [`is_connected`](Self::is_connected) turns true once the server has assigned
    /// our id.
    pub fn connect(&self, address: SocketAddr) {
        self.shared.put_command(ConnectionCommand::Connect { address });
    }

    /// Sends DISCO to every peer and drops them.
    pub fn disconnect(&self) {
        self.shared.put_command(ConnectionCommand::Disconnect);
    }

    /// Sends DISCO to one peer and drops it.
    pub fn disconnect_peer(&self, peer_id: u16) -> Result<()> {
        self.require_peer(peer_id)?;
        self.shared.put_command(ConnectionCommand::DisconnectPeer { peer_id });
        Ok(())
    }

    /// Drops a peer without telling it.
    pub fn delete_peer(&self, peer_id: u16) -> Result<()> {
        self.require_peer(peer_id)?;
        self.shared.put_command(ConnectionCommand::DeletePeer { peer_id });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------------

    /// Queues `data` for `peer_id` on `channel`. Payloads larger than
    /// `fragment_size` are split; reliable payloads are retransmitted until
    /// acknowledged and delivered in order within their channel.
    pub fn send(&self, peer_id: u16, channel: u8, data: &[u8], reliable: bool) -> Result<()> {
        self.check_outgoing(channel, data)?;
        self.require_peer(peer_id)?;
        self.shared.put_command(ConnectionCommand::Send {
            peer_id,
            channel,
            data: data.to_vec(),
            reliable,
        });
        Ok(())
    }

    /// Queues `data` for every peer on `channel`.
    pub fn send_to_all(&self, channel: u8, data: &[u8], reliable: bool) -> Result<()> {
        self.check_outgoing(channel, data)?;
        self.shared.put_command(ConnectionCommand::SendToAll { channel, data: data.to_vec(), reliable });
        Ok(())
    }

    fn check_outgoing(&self, channel: u8, data: &[u8]) -> Result<()> {
        if channel >= CHANNEL_COUNT {
            return Err(ErrorKind::InvalidChannel(channel));
        }
        // An empty ORIGINAL is the connect greeting and is never delivered.
        if data.is_empty() {
            return Err(ErrorKind::InvalidOutgoingData("empty payload"));
        }
        if data.len().div_ceil(self.shared.config.fragment_size) > MAX_SPLIT_CHUNKS {
            return Err(ErrorKind::InvalidOutgoingData("payload needs more than 65535 chunks"));
        }
        Ok(())
    }

    fn require_peer(&self, peer_id: u16) -> Result<()> {
        if self.shared.peers.contains(peer_id) {
            Ok(())
        } else {
            Err(ErrorKind::PeerNotFound(peer_id))
        }
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Waits up to `timeout` for the next event.
    pub fn wait_event(&self, timeout: Duration) -> Option<ConnectionEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Returns the next event if one is ready.
    pub fn get_event(&self) -> Option<ConnectionEvent> {
        self.events.try_recv().ok()
    }

    /// Sets how long [`receive`](Self::receive) waits. Zero means it only checks.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Waits for the next payload, returning its sender and bytes.
    ///
    /// Peer events seen on the way go to the installed [`PeerHandler`]. Fails with
    /// `NoIncomingData` when the timeout runs out and with `ConnectionLost` when the
    /// socket could not be bound.
    pub fn receive(&mut self) -> Result<(u16, Vec<u8>)> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match self.events.recv_timeout(remaining) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => return Err(ErrorKind::NoIncomingData),
                Err(RecvTimeoutError::Disconnected) => return Err(ErrorKind::Disconnected),
            };

            match event {
                ConnectionEvent::DataReceived { peer_id, data } => return Ok((peer_id, data)),
                ConnectionEvent::PeerAdded { peer_id, .. } => {
                    if let Some(handler) = self.peer_handler.as_mut() {
                        handler.peer_added(peer_id);
                    }
                }
                ConnectionEvent::PeerRemoved { peer_id, timeout, .. } => {
                    if let Some(handler) = self.peer_handler.as_mut() {
                        handler.deleting_peer(peer_id, timeout);
                    }
                }
                ConnectionEvent::BindFailed => return Err(ErrorKind::ConnectionLost),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Returns true on a client once the server has assigned our peer id.
    pub fn is_connected(&self) -> bool {
        let local = self.shared.local_peer_id();
        local != PEER_ID_INEXISTENT && local != PEER_ID_SERVER && self.shared.peers.contains(PEER_ID_SERVER)
    }

    /// Our peer id: 1 on a server, the assigned id on a connected client, 0 otherwise.
    pub fn local_peer_id(&self) -> u16 {
        self.shared.local_peer_id()
    }

    /// Protocol id stamped on every datagram.
    pub fn protocol_id(&self) -> u32 {
        self.shared.config.protocol_id
    }

    /// Ids of all current peers, ascending.
    pub fn peer_ids(&self) -> Vec<u16> {
        self.shared.peers.ids()
    }

    /// Address of a peer.
    pub fn peer_address(&self, peer_id: u16) -> Result<SocketAddr> {
        self.shared.peers.get(peer_id).map(|p| p.address()).ok_or(ErrorKind::PeerNotFound(peer_id))
    }

    /// Smoothed round-trip time of a peer, `None` before the first ACK.
    pub fn peer_avg_rtt(&self, peer_id: u16) -> Result<Option<Duration>> {
        self.shared.peers.get(peer_id).map(|p| p.avg_rtt()).ok_or(ErrorKind::PeerNotFound(peer_id))
    }

    /// Returns true while a peer keeps the fixed minimum window, that is until it
    /// has sent ENABLE_BIG_SEND_WINDOW.
    pub fn peer_is_legacy(&self, peer_id: u16) -> Result<bool> {
        self.shared.peers.get(peer_id).map(|p| p.is_legacy()).ok_or(ErrorKind::PeerNotFound(peer_id))
    }

    /// Statistics of one channel of a peer.
    pub fn channel_stats(&self, peer_id: u16, channel: u8) -> Result<ChannelStats> {
        let peer = self.shared.peers.get(peer_id).ok_or(ErrorKind::PeerNotFound(peer_id))?;
        Ok(peer.channel(channel)?.stats())
    }

    /// Bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.transport.local_addr()?)
    }

    /// `"<local peer id>/<local address>"`, the prefix of the connection's log lines.
    pub fn describe(&self) -> String {
        self.shared.describe()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!("{}: shutting down", self.shared.describe());
        self.shared.request_shutdown();
        for handle in [self.send_thread.take(), self.receive_thread.take()].into_iter().flatten() {
            let _ = handle.join();
        }
    }
}
