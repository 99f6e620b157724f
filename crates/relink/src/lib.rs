#![warn(missing_docs)]

//! relink: reliable, multi-channel UDP with a Minetest-compatible wire format.
//!
//! This crate re-exports the surface most applications need:
//!
//! - The connection and its events (`Connection`, `ConnectionEvent`, `PeerHandler`)
//! - Configuration and errors (`Config`, `ErrorKind`, `Result`)
//! - Datagram interception (`Interceptor`, `NoOpInterceptor`)
//! - Channel statistics (`ChannelStats`)
//!
//! Example
//! ```no_run
//! use std::time::Duration;
//! use relink::prelude::*;
//!
//! let client = Connection::new(Config::default()).unwrap();
//! client.connect("127.0.0.1:30000".parse().unwrap());
//!
//! while !client.is_connected() {
//!     std::thread::sleep(Duration::from_millis(10));
//! }
//! client.send(1, 0, b"hello", true).unwrap();
//!
//! if let Some(ConnectionEvent::DataReceived { peer_id, data }) =
//!     client.wait_event(Duration::from_secs(1))
//! {
//!     println!("{} bytes from peer {}", data.len(), peer_id);
//! }
//! ```

// Core config, errors and hooks
pub use relink_core::{
    config::Config,
    constants,
    error::{ErrorKind, Result},
    interceptor::{Interceptor, NoOpInterceptor},
};
// Connection: threads, peers and events
pub use relink_host::{Connection, ConnectionEvent, PeerHandler};
// Peer: statistics
pub use relink_peer::ChannelStats;
// Protocol: wire codec, for tools that read or forge datagrams
pub use relink_protocol::{ControlFrame, Frame, PacketDecoder, PacketEncoder};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        ChannelStats, Config, Connection, ConnectionEvent, ErrorKind, Interceptor, PeerHandler,
        Result,
    };
}
