#![warn(missing_docs)]

//! relink-core: foundational types shared by every relink layer.
//!
//! This crate provides the minimal set of utilities the other crates build on:
//! - Protocol constants (header sizes, reserved peer ids, window limits)
//! - Configuration types
//! - Error handling
//! - Datagram transport and packet interception seams
//!
//! Protocol logic lives in the specialized crates:
//! - `relink-protocol`: wire codec, sequence arithmetic, reliable buffers
//! - `relink-peer`: peers, channels and split reassembly
//! - `relink-host`: the connection with its send and receive threads

/// Protocol constants shared across layers.
pub mod constants {
    /// Number of independent channels per peer.
    pub const CHANNEL_COUNT: u8 = 3;

    /// Size of the header every datagram starts with:
    /// `[0] u32 protocol_id`, `[4] u16 sender_peer_id`, `[6] u8 channel`.
    pub const BASE_HEADER_SIZE: usize = 7;
    /// Size of the CONTROL header (`type`, `controltype`).
    pub const CONTROL_HEADER_SIZE: usize = 2;
    /// Size of the ORIGINAL header (`type`).
    pub const ORIGINAL_HEADER_SIZE: usize = 1;
    /// Size of the SPLIT header (`type`, `seqnum`, `chunk_count`, `chunk_num`).
    pub const SPLIT_HEADER_SIZE: usize = 7;
    /// Size of the RELIABLE header (`type`, `seqnum`).
    pub const RELIABLE_HEADER_SIZE: usize = 3;

    /// Peer id of a peer that has not been assigned an id yet.
    pub const PEER_ID_INEXISTENT: u16 = 0;
    /// Well-known peer id of the server.
    pub const PEER_ID_SERVER: u16 = 1;
    /// First id handed out to remote peers by a server.
    pub const PEER_ID_FIRST_REMOTE: u16 = 2;

    /// Largest value of the 16-bit sequence space.
    pub const SEQNUM_MAX: u16 = 65535;
    /// Starting value of every sequence counter, close to the wrap so that
    /// wraparound is exercised early in every session.
    pub const SEQNUM_INITIAL: u16 = 65500;

    /// Upper bound of the reliable window (half the sequence space).
    pub const MAX_RELIABLE_WINDOW_SIZE: u16 = 0x8000;
    /// Lower bound of the reliable window, also the fixed window of legacy peers.
    pub const MIN_RELIABLE_WINDOW_SIZE: u16 = 0x40;
    /// Window a negotiated peer starts with.
    pub const START_RELIABLE_WINDOW_SIZE: u16 = 0x400;

    /// Lowest resend timeout, in seconds.
    pub const RESEND_TIMEOUT_MIN: f32 = 0.1;
    /// Highest resend timeout, in seconds.
    pub const RESEND_TIMEOUT_MAX: f32 = 3.0;
    /// Resend timeout as a multiple of the average round-trip time.
    pub const RESEND_TIMEOUT_FACTOR: f32 = 4.0;

    /// Interval between keepalive pings, in seconds.
    pub const PING_TIMEOUT: f32 = 5.0;

    /// Default protocol id stamped on every datagram.
    pub const DEFAULT_PROTOCOL_ID: u32 = 0x4f45_7403;
    /// Default largest datagram size.
    pub const DEFAULT_MAX_PACKET_SIZE: usize = 512;
}

/// Configuration options for the protocol and the connection threads.
pub mod config;
/// Error types and results.
pub mod error;
/// Packet interception for custom processing.
pub mod interceptor;
/// Shared, reference-counted byte slices with zero-copy slicing.
pub mod shared;
/// Transport abstraction for pluggable datagram I/O.
pub mod transport;
