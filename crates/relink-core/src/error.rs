//! Error types shared by every relink crate.

use std::io;

use thiserror::Error;

/// Result alias used throughout relink.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Every failure relink can report.
///
/// Only `PeerNotFound`, `InvalidChannel`, `InvalidOutgoingData`, `NoIncomingData`
/// and `ConnectionLost` reach the application; the rest are raised and handled
/// inside the pipelines, where they are logged and the offending datagram is
/// dropped.
#[derive(Error, Debug)]
pub enum ErrorKind {
    /// A sequence number or entry was not present. Benign (late or duplicate ACK).
    #[error("not found")]
    NotFound,
    /// The addressed peer id is not known to the connection.
    #[error("peer {0} not found")]
    PeerNotFound(u16),
    /// A datagram failed validation and was dropped.
    #[error("invalid incoming data: {0}")]
    InvalidIncomingData(&'static str),
    /// A datagram broke an internal invariant while being decoded.
    #[error("incoming data corruption: {0}")]
    DataCorruption(&'static str),
    /// An outgoing payload cannot be framed (too many chunks).
    #[error("invalid outgoing data: {0}")]
    InvalidOutgoingData(&'static str),
    /// A reliable packet with this sequence number is already buffered.
    #[error("packet already buffered")]
    AlreadyExists,
    /// The listening socket could not be bound.
    #[error("bind failed: {0}")]
    BindFailed(io::Error),
    /// The channel number is outside the fixed channel range.
    #[error("invalid channel {0}")]
    InvalidChannel(u8),
    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// No data arrived before the timeout elapsed.
    #[error("no incoming data")]
    NoIncomingData,
    /// The connection lost its socket (a bind failure was reported).
    #[error("connection lost")]
    ConnectionLost,
    /// The connection threads have shut down.
    #[error("connection threads are gone")]
    Disconnected,
    /// Wrapper around an I/O failure.
    #[error("io error: {0}")]
    IOError(#[from] io::Error),
}

impl ErrorKind {
    /// Returns true for errors that are a normal part of operation and need no logging
    /// above trace level.
    pub fn is_benign(&self) -> bool {
        matches!(self, ErrorKind::NotFound | ErrorKind::AlreadyExists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        fn fails() -> Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "boom"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(ErrorKind::IOError(_))));
    }

    #[test]
    fn test_benign_errors() {
        assert!(ErrorKind::NotFound.is_benign());
        assert!(ErrorKind::AlreadyExists.is_benign());
        assert!(!ErrorKind::DataCorruption("x").is_benign());
        assert!(!ErrorKind::PeerNotFound(3).is_benign());
    }

    #[test]
    fn test_display_mentions_peer_id() {
        assert_eq!(ErrorKind::PeerNotFound(7).to_string(), "peer 7 not found");
    }
}
