//! Frame type tags and buffered packet records.
//!
//! This module provides the types shared by the codec and the buffers:
//! - `PacketType` / `ControlType`: the type tags of the wire format
//! - `BaseHeader`: the decoded 7-byte header every datagram starts with
//! - `BufferedPacket`: a framed reliable datagram plus its retransmission timers

use std::{convert::TryFrom, net::SocketAddr, time::Duration};

use relink_core::{
    constants::{BASE_HEADER_SIZE, RELIABLE_HEADER_SIZE},
    error::ErrorKind,
    shared::SharedBytes,
};

/// 16-bit sequence number type used by protocol.
pub type SequenceNumber = u16;

/// Helper trait to convert enums to u8 values for wire format.
pub trait EnumConverter {
    /// The enum type this converter works with.
    type Enum;

    /// Converts the enum to a u8 for serialization.
    fn to_u8(&self) -> u8;
}

// ============================================================================
// Type Tags
// ============================================================================

/// First byte after the base header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// Protocol-internal message, see [`ControlType`].
    Control = 0,
    /// Payload delivered to the application as is.
    Original = 1,
    /// One chunk of a payload too large for one datagram.
    Split = 2,
    /// Wrapper that must be acknowledged and is retransmitted until it is.
    Reliable = 3,
}

impl EnumConverter for PacketType {
    type Enum = PacketType;

    fn to_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Control),
            1 => Ok(PacketType::Original),
            2 => Ok(PacketType::Split),
            3 => Ok(PacketType::Reliable),
            _ => Err(ErrorKind::InvalidIncomingData("unknown packet type")),
        }
    }
}

/// Second byte of a CONTROL frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlType {
    /// Acknowledges a reliable sequence number.
    Ack = 0,
    /// Server tells a new client which peer id it was given.
    SetPeerId = 1,
    /// Keepalive; always sent reliable so that it is acknowledged.
    Ping = 2,
    /// The sender is going away.
    Disco = 3,
    /// Client tells the server it understands the adaptive send window.
    EnableBigSendWindow = 4,
}

impl EnumConverter for ControlType {
    type Enum = ControlType;

    fn to_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for ControlType {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ControlType::Ack),
            1 => Ok(ControlType::SetPeerId),
            2 => Ok(ControlType::Ping),
            3 => Ok(ControlType::Disco),
            4 => Ok(ControlType::EnableBigSendWindow),
            _ => Err(ErrorKind::InvalidIncomingData("unknown control type")),
        }
    }
}

// ============================================================================
// Packet Structures
// ============================================================================

/// The header every datagram starts with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BaseHeader {
    /// Identifies the protocol; datagrams with another id are dropped.
    pub protocol_id: u32,
    /// Peer id of the sender, `PEER_ID_INEXISTENT` until it has been assigned one.
    pub sender_peer_id: u16,
    /// Channel the datagram travels on.
    pub channel: u8,
}

/// A framed datagram kept for retransmission or in-order delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferedPacket {
    /// The complete datagram, base header included.
    pub data: SharedBytes,
    /// Where the datagram goes (outgoing) or came from (incoming).
    pub address: SocketAddr,
    /// Time since the packet was buffered or last resent.
    pub time: Duration,
    /// Time since the packet was first buffered.
    pub totaltime: Duration,
}

impl BufferedPacket {
    /// Wraps a complete datagram with fresh timers.
    pub fn new(data: impl Into<SharedBytes>, address: SocketAddr) -> Self {
        Self { data: data.into(), address, time: Duration::ZERO, totaltime: Duration::ZERO }
    }

    /// Returns true if the datagram carries a RELIABLE frame.
    pub fn is_reliable(&self) -> bool {
        self.data.len() >= BASE_HEADER_SIZE + RELIABLE_HEADER_SIZE
            && self.data[BASE_HEADER_SIZE] == PacketType::Reliable as u8
    }

    /// Returns the reliable sequence number, or `None` if the datagram is not RELIABLE.
    pub fn seqnum(&self) -> Option<SequenceNumber> {
        if !self.is_reliable() {
            return None;
        }
        let at = BASE_HEADER_SIZE + 1;
        Some(u16::from_be_bytes([self.data[at], self.data[at + 1]]))
    }

    /// Returns the frame wrapped by the RELIABLE header.
    pub fn inner(&self) -> Option<SharedBytes> {
        self.data.tail(BASE_HEADER_SIZE + RELIABLE_HEADER_SIZE)
    }

    /// Returns the channel byte of the base header.
    pub fn channel(&self) -> Option<u8> {
        self.data.get(BASE_HEADER_SIZE - 1).copied()
    }
}
