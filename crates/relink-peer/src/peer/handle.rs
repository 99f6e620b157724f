use std::{
    ops::Deref,
    sync::{atomic::Ordering, Arc},
};

use super::Peer;

/// Counted checkout of a [`Peer`].
///
/// While a handle exists the peer's usage count is non-zero; deleting the peer from
/// the table does not invalidate it.
#[derive(Debug)]
pub struct PeerHandle {
    peer: Arc<Peer>,
}

impl PeerHandle {
    /// Checks out `peer`, or returns `None` if it is pending deletion.
    pub fn checkout(peer: &Arc<Peer>) -> Option<Self> {
        peer.usage.fetch_add(1, Ordering::AcqRel);
        let handle = Self { peer: Arc::clone(peer) };
        if peer.is_pending_deletion() {
            // Dropping the handle undoes the increment.
            return None;
        }
        Some(handle)
    }

    /// The shared peer behind the handle.
    pub fn arc(&self) -> &Arc<Peer> {
        &self.peer
    }
}

impl Deref for PeerHandle {
    type Target = Peer;

    fn deref(&self) -> &Peer {
        &self.peer
    }
}

impl Clone for PeerHandle {
    fn clone(&self) -> Self {
        self.peer.usage.fetch_add(1, Ordering::AcqRel);
        Self { peer: Arc::clone(&self.peer) }
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.peer.usage.fetch_sub(1, Ordering::AcqRel);
    }
}
