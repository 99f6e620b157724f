#![warn(missing_docs)]

//! relink-host: the threaded connection over UDP.
//!
//! A [`Connection`] owns a send thread and a receive thread sharing one socket and
//! one peer table. The application talks to them through commands (the
//! `Connection` methods) and [`ConnectionEvent`]s.

mod connection;
/// Command, event and outgoing packet types.
pub mod event_types;
/// Callbacks for the blocking receive API.
pub mod peer_handler;
/// The peer table of a connection.
pub mod peer_table;
/// UDP socket binding and the bindable transport.
pub mod socket;

mod receive_thread;
mod send_thread;
mod state;

pub use connection::Connection;
pub use event_types::{ConnectionCommand, ConnectionEvent, OutgoingPacket};
pub use peer_handler::PeerHandler;
pub use peer_table::PeerTable;
pub use socket::UdpTransport;
