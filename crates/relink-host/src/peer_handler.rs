/// Callbacks for peer lifecycle events seen by [`Connection::receive`].
///
/// `receive` only returns payloads; peer additions and removals it encounters on the
/// way are handed to the installed handler instead.
///
/// [`Connection::receive`]: crate::Connection::receive
pub trait PeerHandler: Send {
    /// A peer was added to the connection.
    fn peer_added(&mut self, peer_id: u16);

    /// A peer was removed; `timeout` is true if it went silent.
    fn deleting_peer(&mut self, peer_id: u16, timeout: bool);
}
