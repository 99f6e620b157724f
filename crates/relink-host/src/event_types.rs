//! Command and event types for the connection threads.
//!
//! This module defines the values exchanged between the application and the
//! connection threads:
//! - `ConnectionCommand`: instructions for the send thread
//! - `ConnectionEvent`: notifications for the application
//! - `OutgoingPacket`: a frame the send thread is about to put on the wire

use std::net::SocketAddr;

use relink_protocol::SequenceNumber;

/// Instructions processed by the send thread, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionCommand {
    /// Bind the socket to `address` and act as a server.
    Serve {
        /// Local address to bind.
        address: SocketAddr,
    },
    /// Create the server peer for `address` and greet it.
    Connect {
        /// Server address.
        address: SocketAddr,
    },
    /// Say goodbye to every peer and drop them.
    Disconnect,
    /// Say goodbye to one peer and drop it.
    DisconnectPeer {
        /// Peer to drop.
        peer_id: u16,
    },
    /// Send a payload to one peer.
    Send {
        /// Destination peer.
        peer_id: u16,
        /// Channel to send on.
        channel: u8,
        /// Application payload.
        data: Vec<u8>,
        /// Retransmit until acknowledged.
        reliable: bool,
    },
    /// Send a payload to every peer.
    SendToAll {
        /// Channel to send on.
        channel: u8,
        /// Application payload.
        data: Vec<u8>,
        /// Retransmit until acknowledged.
        reliable: bool,
    },
    /// Drop a peer without telling it.
    DeletePeer {
        /// Peer to drop.
        peer_id: u16,
    },
    /// Acknowledge a received reliable.
    Ack {
        /// Peer the reliable came from.
        peer_id: u16,
        /// Channel it arrived on.
        channel: u8,
        /// Its sequence number.
        seqnum: SequenceNumber,
    },
    /// Tell a freshly created peer its id.
    CreatePeer {
        /// The new peer.
        peer_id: u16,
    },
    /// Ask the server to lift the legacy window.
    EnableBigSendWindow {
        /// The server peer.
        peer_id: u16,
    },
}

/// Notifications for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A complete payload arrived.
    DataReceived {
        /// Sender.
        peer_id: u16,
        /// The payload, reassembled if it was split.
        data: Vec<u8>,
    },
    /// A peer joined (server) or was created by `connect` (client).
    PeerAdded {
        /// The new peer.
        peer_id: u16,
        /// Its address.
        address: SocketAddr,
    },
    /// A peer was removed. Reported exactly once per peer.
    PeerRemoved {
        /// The removed peer.
        peer_id: u16,
        /// True if it went silent, false if it disconnected or was dropped.
        timeout: bool,
        /// Its address.
        address: SocketAddr,
    },
    /// `serve` or `connect` could not bind the socket.
    BindFailed,
}

/// A frame waiting in the send thread's outgoing queue.
#[derive(Debug, Clone)]
pub struct OutgoingPacket {
    /// Destination peer
    pub peer_id: u16,
    /// Channel to send on
    pub channel: u8,
    /// Frame without base header (and without RELIABLE wrapper)
    pub frame: Vec<u8>,
    /// Wrap into a RELIABLE frame
    pub reliable: bool,
    /// ACKs skip the per-peer quota
    pub ack: bool,
}

impl OutgoingPacket {
    /// A data or control frame.
    pub fn new(peer_id: u16, channel: u8, frame: Vec<u8>, reliable: bool) -> Self {
        Self { peer_id, channel, frame, reliable, ack: false }
    }

    /// An ACK frame.
    pub fn ack(peer_id: u16, channel: u8, frame: Vec<u8>) -> Self {
        Self { peer_id, channel, frame, reliable: false, ack: true }
    }
}
