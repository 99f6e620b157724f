use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use parking_lot::Mutex;
use relink_core::{
    constants::PEER_ID_FIRST_REMOTE,
    error::{ErrorKind, Result},
};
use relink_peer::{Peer, PeerHandle};

#[derive(Debug)]
struct Peers {
    by_id: HashMap<u16, Arc<Peer>>,
    /// Where the search for a free remote id starts
    next_remote_id: u16,
}

/// The peers of one connection, by id.
///
/// The lock only guards structural changes and lookups; peers are used through
/// [`PeerHandle`]s once looked up.
#[derive(Debug)]
pub struct PeerTable {
    peers: Mutex<Peers>,
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(Peers { by_id: HashMap::new(), next_remote_id: PEER_ID_FIRST_REMOTE }),
        }
    }

    /// Adds `peer` under its id. Fails with `AlreadyExists` if the id is taken.
    pub fn insert(&self, peer: Arc<Peer>) -> Result<()> {
        let mut peers = self.peers.lock();
        if peers.by_id.contains_key(&peer.id()) {
            return Err(ErrorKind::AlreadyExists);
        }
        peers.by_id.insert(peer.id(), peer);
        Ok(())
    }

    /// Creates a remote peer for `address` under the next free id (2 and up, wrapping).
    pub fn create_remote(&self, address: SocketAddr) -> Result<Arc<Peer>> {
        let mut peers = self.peers.lock();
        let start = peers.next_remote_id;
        let mut id = start;
        while peers.by_id.contains_key(&id) {
            id = next_remote_id(id);
            if id == start {
                return Err(ErrorKind::InvalidIncomingData("no free peer id"));
            }
        }
        peers.next_remote_id = next_remote_id(id);

        let peer = Arc::new(Peer::new_remote(id, address));
        peers.by_id.insert(id, Arc::clone(&peer));
        Ok(peer)
    }

    /// Looks up a peer, pending deletion or not.
    pub fn get(&self, peer_id: u16) -> Option<Arc<Peer>> {
        self.peers.lock().by_id.get(&peer_id).cloned()
    }

    /// Checks out a peer that is not pending deletion.
    pub fn checkout(&self, peer_id: u16) -> Option<PeerHandle> {
        self.get(peer_id).and_then(|peer| PeerHandle::checkout(&peer))
    }

    /// Finds the peer at `address`.
    pub fn find_by_address(&self, address: &SocketAddr) -> Option<Arc<Peer>> {
        self.peers.lock().by_id.values().find(|p| p.address() == *address).cloned()
    }

    /// Removes a peer and marks it pending deletion. Only the first call for a peer
    /// returns it.
    pub fn remove(&self, peer_id: u16) -> Option<Arc<Peer>> {
        let peer = self.peers.lock().by_id.remove(&peer_id)?;
        peer.mark_pending_deletion();
        Some(peer)
    }

    /// All peer ids, ascending.
    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.peers.lock().by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// All peers, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        let mut peers: Vec<Arc<Peer>> = self.peers.lock().by_id.values().cloned().collect();
        peers.sort_unstable_by_key(|p| p.id());
        peers
    }

    /// Returns true if `peer_id` is in the table.
    pub fn contains(&self, peer_id: u16) -> bool {
        self.peers.lock().by_id.contains_key(&peer_id)
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.peers.lock().by_id.len()
    }

    /// Returns true if there are no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.lock().by_id.is_empty()
    }
}

fn next_remote_id(id: u16) -> u16 {
    if id == u16::MAX {
        PEER_ID_FIRST_REMOTE
    } else {
        id + 1
    }
}

#[cfg(test)]
mod tests {
    use relink_core::constants::{PEER_ID_SERVER, START_RELIABLE_WINDOW_SIZE};

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_remote_ids_start_at_two() {
        let table = PeerTable::new();
        let first = table.create_remote(addr(1000)).unwrap();
        let second = table.create_remote(addr(1001)).unwrap();
        assert_eq!(first.id(), 2);
        assert_eq!(second.id(), 3);
        assert_eq!(table.ids(), vec![2, 3]);
    }

    #[test]
    fn test_freed_ids_are_not_reused_right_away() {
        let table = PeerTable::new();
        let first = table.create_remote(addr(1000)).unwrap();
        table.remove(first.id()).unwrap();
        assert_eq!(table.create_remote(addr(1001)).unwrap().id(), 3);
    }

    #[test]
    fn test_insert_duplicate_id() {
        let table = PeerTable::new();
        let server = Arc::new(Peer::new_local(PEER_ID_SERVER, addr(30000), START_RELIABLE_WINDOW_SIZE));
        table.insert(Arc::clone(&server)).unwrap();
        assert!(matches!(table.insert(server), Err(ErrorKind::AlreadyExists)));
    }

    #[test]
    fn test_find_by_address() {
        let table = PeerTable::new();
        let peer = table.create_remote(addr(1000)).unwrap();
        assert_eq!(table.find_by_address(&addr(1000)).unwrap().id(), peer.id());
        assert!(table.find_by_address(&addr(1001)).is_none());
    }

    #[test]
    fn test_remove_once() {
        let table = PeerTable::new();
        let peer = table.create_remote(addr(1000)).unwrap();
        let handle = table.checkout(peer.id()).unwrap();

        let removed = table.remove(peer.id()).unwrap();
        assert!(removed.is_pending_deletion());
        assert!(table.remove(peer.id()).is_none());
        assert!(table.checkout(peer.id()).is_none());
        assert!(table.is_empty());

        // Handles taken before removal keep working.
        assert_eq!(handle.address(), addr(1000));
    }
}
