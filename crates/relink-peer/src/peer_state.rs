/// Peer lifecycle state.
///
/// A peer is dropped for good once it is out of the peer table and the last
/// [`PeerHandle`](crate::PeerHandle) is gone; there is no explicit state for that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    /// Remote peer created from a sender-0 datagram, not yet seen with its own id
    #[default]
    Unidentified,

    /// Local peers from the start; remote peers once traffic carries their id
    Active,

    /// Removed from the peer table; existing handles stay valid, new checkouts fail
    PendingDeletion,
}

impl PeerState {
    /// Returns true if the peer may still be checked out and sent to.
    pub fn is_usable(&self) -> bool {
        !matches!(self, PeerState::PendingDeletion)
    }
}

/// Which side created the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOrigin {
    /// Created by a server for an incoming client
    Remote,
    /// Created by `connect` for the server a client talks to
    Local,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_states() {
        assert!(PeerState::default().is_usable());
        assert!(PeerState::Active.is_usable());
        assert!(!PeerState::PendingDeletion.is_usable());
    }
}
