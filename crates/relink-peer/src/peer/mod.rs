use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use relink_core::{
    constants::{CHANNEL_COUNT, MIN_RELIABLE_WINDOW_SIZE},
    error::{ErrorKind, Result},
};
use relink_protocol::RttEstimator;

use crate::{
    channel::Channel,
    peer_state::{PeerOrigin, PeerState},
};

mod handle;

pub use handle::PeerHandle;

#[derive(Debug, Default)]
struct Timers {
    /// Time since the last valid datagram from the peer
    timeout_counter: Duration,
    /// Time since the last keepalive
    ping_timer: Duration,
}

/// A remote endpoint of a connection.
///
/// Peers are shared between the connection threads behind an `Arc` and mutate
/// through interior locks, one per concern.
pub struct Peer {
    id: u16,
    address: SocketAddr,
    origin: PeerOrigin,
    state: Mutex<PeerState>,
    channels: [Channel; CHANNEL_COUNT as usize],
    rtt: Mutex<RttEstimator>,
    timers: Mutex<Timers>,
    /// Peer has not announced the adaptive window; channels keep the minimum window
    legacy: AtomicBool,
    /// Number of live [`PeerHandle`]s
    usage: AtomicUsize,
}

impl Peer {
    /// Creates a peer for an incoming client. It starts unidentified, with the fixed
    /// legacy window until it asks for the adaptive one.
    pub fn new_remote(id: u16, address: SocketAddr) -> Self {
        Self::new(id, address, PeerOrigin::Remote, PeerState::Unidentified, None)
    }

    /// Creates the server peer of a client. It is active at once and uses the adaptive
    /// window starting at `window_size`.
    pub fn new_local(id: u16, address: SocketAddr, window_size: u16) -> Self {
        Self::new(id, address, PeerOrigin::Local, PeerState::Active, Some(window_size))
    }

    fn new(
        id: u16,
        address: SocketAddr,
        origin: PeerOrigin,
        state: PeerState,
        adaptive_window: Option<u16>,
    ) -> Self {
        let make_channel = || match adaptive_window {
            Some(size) => Channel::new(size, true),
            None => Channel::new(MIN_RELIABLE_WINDOW_SIZE, false),
        };
        Self {
            id,
            address,
            origin,
            state: Mutex::new(state),
            channels: std::array::from_fn(|_| make_channel()),
            rtt: Mutex::new(RttEstimator::default()),
            timers: Mutex::new(Timers::default()),
            legacy: AtomicBool::new(adaptive_window.is_none()),
            usage: AtomicUsize::new(0),
        }
    }

    /// Peer id.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Network address; fixed for the peer's lifetime.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Which side created the peer.
    pub fn origin(&self) -> PeerOrigin {
        self.origin
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    /// Marks an unidentified peer active. Returns true if the state changed.
    pub fn activate(&self) -> bool {
        let mut state = self.state.lock();
        if *state == PeerState::Unidentified {
            *state = PeerState::Active;
            return true;
        }
        false
    }

    /// Flags the peer for deletion. Returns false if it already was.
    pub fn mark_pending_deletion(&self) -> bool {
        let mut state = self.state.lock();
        if *state == PeerState::PendingDeletion {
            return false;
        }
        *state = PeerState::PendingDeletion;
        true
    }

    /// Returns true once the peer has been removed from the table.
    pub fn is_pending_deletion(&self) -> bool {
        !self.state.lock().is_usable()
    }

    /// Number of live handles.
    pub fn usage_count(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------------

    /// Returns channel `channel`, or `InvalidChannel`.
    pub fn channel(&self, channel: u8) -> Result<&Channel> {
        self.channels.get(usize::from(channel)).ok_or(ErrorKind::InvalidChannel(channel))
    }

    /// All channels with their numbers.
    pub fn channels(&self) -> impl Iterator<Item = (u8, &Channel)> {
        self.channels.iter().enumerate().map(|(i, c)| (i as u8, c))
    }

    /// Returns true while the peer keeps the fixed minimum window.
    pub fn is_legacy(&self) -> bool {
        self.legacy.load(Ordering::Acquire)
    }

    /// Switches every channel to the adaptive window starting at `window_size`.
    /// Returns false if the peer already had it.
    pub fn enable_big_send_window(&self, window_size: u16) -> bool {
        if !self.legacy.swap(false, Ordering::AcqRel) {
            return false;
        }
        for channel in &self.channels {
            channel.enable_adaptive_window(window_size);
        }
        tracing::debug!("Peer {} uses the adaptive window", self.id);
        true
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    /// Restarts the idle timer. Called for every valid datagram from the peer.
    pub fn reset_timeout(&self) {
        self.timers.lock().timeout_counter = Duration::ZERO;
    }

    /// Advances the idle timer by `dtime`.
    pub fn increment_timeout(&self, dtime: Duration) {
        self.timers.lock().timeout_counter += dtime;
    }

    /// Returns true if the peer has been idle for longer than `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.timers.lock().timeout_counter > timeout
    }

    /// Advances the keepalive timer. Returns true, and restarts it, when a ping is due.
    pub fn ping_due(&self, dtime: Duration, interval: Duration) -> bool {
        let mut timers = self.timers.lock();
        timers.ping_timer += dtime;
        if timers.ping_timer >= interval {
            timers.ping_timer = Duration::ZERO;
            return true;
        }
        false
    }

    // ------------------------------------------------------------------------
    // Round-trip time
    // ------------------------------------------------------------------------

    /// Feeds a round-trip sample taken from an acknowledged reliable.
    pub fn report_rtt(&self, sample: Duration) {
        self.rtt.lock().report(sample);
    }

    /// Smoothed round-trip time, `None` before the first sample.
    pub fn avg_rtt(&self) -> Option<Duration> {
        self.rtt.lock().avg_rtt()
    }

    /// Per-attempt resend timeout of reliables.
    pub fn resend_timeout(&self) -> Duration {
        self.rtt.lock().resend_timeout()
    }

    /// Doubles the resend timeout after reliables timed out.
    pub fn back_off_resend_timeout(&self) {
        self.rtt.lock().back_off();
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("origin", &self.origin)
            .field("state", &self.state())
            .field("legacy", &self.is_legacy())
            .field("usage", &self.usage_count())
            .finish()
    }
}
