//! Channel statistics snapshots.
//!
//! Counters are kept inside the channel; [`ChannelStats`] is the copy handed out to
//! callers, taken under the channel lock so all figures are consistent.

/// Snapshot of one channel's transfer statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelStats {
    /// Current reliable window
    pub window_size: u16,
    /// Reliables sent and not yet acknowledged
    pub outgoing_reliables: usize,
    /// Reliables received ahead of the next expected seqnum
    pub incoming_reliables: usize,
    /// Reliable frames waiting for a free seqnum
    pub queued_reliables: usize,
    /// Split payloads still being reassembled
    pub incomplete_splits: usize,
    /// Total datagrams sent
    pub packets_sent: u64,
    /// Total datagrams resent after a timeout
    pub packets_lost: u64,
    /// Total reliables received behind the window
    pub packets_too_late: u64,
    /// Total acknowledged reliables
    pub packets_acked: u64,
    /// Send rate of the last period, KB/s
    pub cur_kbps: f32,
    /// Average send rate, KB/s
    pub avg_kbps: f32,
    /// Highest send rate, KB/s
    pub max_kbps: f32,
    /// Receive rate of the last period, KB/s
    pub cur_incoming_kbps: f32,
    /// Average receive rate, KB/s
    pub avg_incoming_kbps: f32,
    /// Highest receive rate, KB/s
    pub max_incoming_kbps: f32,
    /// Loss rate of the last period, KB/s
    pub cur_kbps_lost: f32,
    /// Average loss rate, KB/s
    pub avg_kbps_lost: f32,
    /// Highest loss rate, KB/s
    pub max_kbps_lost: f32,
}

impl ChannelStats {
    /// Lost datagrams over sent datagrams (0.0 to 1.0).
    pub fn packet_loss_rate(&self) -> f32 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.packets_lost as f32 / self.packets_sent as f32
    }
}
