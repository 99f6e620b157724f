#![warn(missing_docs)]

//! relink-peer: per-peer state for managing remote endpoints.

/// Channels with their sequence counters, buffers and adaptive window.
pub mod channel;
/// Reliable frames waiting for a free sequence number.
pub mod command_queue;
mod peer;
mod peer_state;
/// Reassembly of split payloads.
pub mod split_buffer;
/// Channel statistics snapshots.
pub mod statistics;

pub use channel::Channel;
pub use peer::{Peer, PeerHandle};
pub use peer_state::{PeerOrigin, PeerState};
pub use split_buffer::IncomingSplitBuffer;
pub use statistics::ChannelStats;
