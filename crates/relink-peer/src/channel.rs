//! Per-channel sequencing, reliable buffers and window control.
//!
//! Every peer has [`CHANNEL_COUNT`](relink_core::constants::CHANNEL_COUNT) independent
//! channels. A channel owns:
//!
//! - the incoming, outgoing and split sequence counters
//! - the outgoing-reliable buffer (sent, waiting for an ACK) and the incoming-reliable
//!   buffer (received ahead of the next expected seqnum)
//! - the split reassembly buffer
//! - reliable frames queued while the window is full
//! - transfer statistics and the adaptive reliable window
//!
//! Counters and statistics share one lock; each buffer has its own.

use std::time::Duration;

use parking_lot::Mutex;
use relink_core::{
    constants::{MAX_RELIABLE_WINDOW_SIZE, MIN_RELIABLE_WINDOW_SIZE, SEQNUM_INITIAL},
    error::Result,
};
use relink_protocol::{BufferedPacket, RateCounter, ReliablePacketBuffer, SequenceNumber};

use crate::{command_queue::CommandQueue, split_buffer::IncomingSplitBuffer, statistics::ChannelStats};

/// Period of the window adaptation.
const WINDOW_ADAPT_INTERVAL: Duration = Duration::from_secs(1);
/// Period of the KB/s figures.
const RATE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct ChannelState {
    next_incoming_seqnum: SequenceNumber,
    next_outgoing_seqnum: SequenceNumber,
    next_split_seqnum: SequenceNumber,

    window_size: u16,
    /// Window follows the loss rate; false for legacy peers
    adaptive: bool,

    // Counts of the current adaptation period
    current_packet_loss: u32,
    current_packet_too_late: u32,
    current_packet_successful: u32,
    window_timer: Duration,

    sent: RateCounter,
    received: RateCounter,
    lost: RateCounter,
    rate_timer: Duration,

    packets_sent: u64,
    packets_lost: u64,
    packets_too_late: u64,
    packets_acked: u64,
}

impl ChannelState {
    fn set_window_size(&mut self, size: i32) {
        let clamped = size.clamp(i32::from(MIN_RELIABLE_WINDOW_SIZE), i32::from(MAX_RELIABLE_WINDOW_SIZE));
        let clamped = clamped as u16;
        if clamped != self.window_size {
            tracing::debug!("Reliable window {} -> {}", self.window_size, clamped);
            self.window_size = clamped;
        }
    }

    fn adapt_window(&mut self) {
        let losses = self.current_packet_loss;
        let successes = self.current_packet_successful;
        let too_late = self.current_packet_too_late;
        let enough_data = self.sent.pending_bytes() > u64::from(self.window_size) * 512 / 2;
        let window = i32::from(self.window_size);

        self.current_packet_loss = 0;
        self.current_packet_too_late = 0;
        self.current_packet_successful = 0;

        if !self.adaptive {
            return;
        }

        if successes == 0 && losses > 0 {
            self.set_window_size(window - 10);
            return;
        }
        if too_late > 0 {
            self.set_window_size(window - 10);
            return;
        }

        let loss_ratio = if successes > 0 { losses as f32 / successes as f32 } else { 0.0 };
        if loss_ratio < 0.01 {
            if enough_data {
                self.set_window_size(window + 100);
            }
        } else if loss_ratio < 0.05 {
            if enough_data {
                self.set_window_size(window + 50);
            }
        } else if loss_ratio > 0.15 {
            self.set_window_size(window - 100);
        } else if loss_ratio > 0.10 {
            self.set_window_size(window - 50);
        }
    }

    fn roll_rates(&mut self) {
        let elapsed = self.rate_timer;
        self.sent.roll(elapsed);
        self.received.roll(elapsed);
        self.lost.roll(elapsed);
        self.rate_timer = Duration::ZERO;
    }
}

/// One of a peer's independent streams.
#[derive(Debug)]
pub struct Channel {
    state: Mutex<ChannelState>,
    outgoing_reliables_sent: ReliablePacketBuffer,
    incoming_reliables: ReliablePacketBuffer,
    split_buffer: Mutex<IncomingSplitBuffer>,
    queued_reliables: Mutex<CommandQueue>,
}

impl Channel {
    /// Creates a channel. An `adaptive` window starts at `window_size` and follows the
    /// loss rate; otherwise the window stays at `window_size`.
    pub fn new(window_size: u16, adaptive: bool) -> Self {
        let window_size = window_size.clamp(MIN_RELIABLE_WINDOW_SIZE, MAX_RELIABLE_WINDOW_SIZE);
        Self {
            state: Mutex::new(ChannelState {
                next_incoming_seqnum: SEQNUM_INITIAL,
                next_outgoing_seqnum: SEQNUM_INITIAL,
                next_split_seqnum: SEQNUM_INITIAL,
                window_size,
                adaptive,
                current_packet_loss: 0,
                current_packet_too_late: 0,
                current_packet_successful: 0,
                window_timer: Duration::ZERO,
                sent: RateCounter::new(),
                received: RateCounter::new(),
                lost: RateCounter::new(),
                rate_timer: Duration::ZERO,
                packets_sent: 0,
                packets_lost: 0,
                packets_too_late: 0,
                packets_acked: 0,
            }),
            outgoing_reliables_sent: ReliablePacketBuffer::new(),
            incoming_reliables: ReliablePacketBuffer::new(),
            split_buffer: Mutex::new(IncomingSplitBuffer::new()),
            queued_reliables: Mutex::new(CommandQueue::default()),
        }
    }

    // ------------------------------------------------------------------------
    // Sequence numbers
    // ------------------------------------------------------------------------

    /// Seqnum the next in-order reliable must carry.
    pub fn next_incoming_seqnum(&self) -> SequenceNumber {
        self.state.lock().next_incoming_seqnum
    }

    /// Advances the next incoming seqnum by one, wrapping.
    pub fn inc_next_incoming_seqnum(&self) -> SequenceNumber {
        let mut state = self.state.lock();
        state.next_incoming_seqnum = state.next_incoming_seqnum.wrapping_add(1);
        state.next_incoming_seqnum
    }

    /// Allocates the next outgoing reliable seqnum, or `None` if the window is full.
    ///
    /// The window counts seqnums from the oldest unacknowledged one (or the next one,
    /// when nothing is outstanding) up to the next one.
    pub fn get_outgoing_sequence_number(&self) -> Option<SequenceNumber> {
        let mut state = self.state.lock();
        let next = state.next_outgoing_seqnum;
        let lowest_unacked = self.outgoing_reliables_sent.first_seqnum().unwrap_or(next);
        if next.wrapping_sub(lowest_unacked) >= state.window_size {
            return None;
        }
        state.next_outgoing_seqnum = next.wrapping_add(1);
        Some(next)
    }

    /// Seqnum the next outgoing reliable would get.
    pub fn read_outgoing_sequence_number(&self) -> SequenceNumber {
        self.state.lock().next_outgoing_seqnum
    }

    /// Returns `seqnum` to the channel if it was the last one handed out.
    pub fn put_back_sequence_number(&self, seqnum: SequenceNumber) -> bool {
        let mut state = self.state.lock();
        if seqnum.wrapping_add(1) == state.next_outgoing_seqnum {
            state.next_outgoing_seqnum = seqnum;
            return true;
        }
        false
    }

    /// Seqnum the next split payload will be tagged with.
    pub fn next_split_seqnum(&self) -> SequenceNumber {
        self.state.lock().next_split_seqnum
    }

    /// Stores the split seqnum after a payload has been split.
    pub fn set_next_split_seqnum(&self, seqnum: SequenceNumber) {
        self.state.lock().next_split_seqnum = seqnum;
    }

    // ------------------------------------------------------------------------
    // Window
    // ------------------------------------------------------------------------

    /// Current reliable window.
    pub fn window_size(&self) -> u16 {
        self.state.lock().window_size
    }

    /// Switches to the adaptive window, starting over at `window_size`.
    pub fn enable_adaptive_window(&self, window_size: u16) {
        let mut state = self.state.lock();
        state.adaptive = true;
        state.set_window_size(i32::from(window_size));
    }

    /// Returns true if the window follows the loss rate.
    pub fn is_adaptive(&self) -> bool {
        self.state.lock().adaptive
    }

    // ------------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------------

    /// Reliables sent and waiting for an acknowledgement.
    pub fn outgoing_reliables(&self) -> &ReliablePacketBuffer {
        &self.outgoing_reliables_sent
    }

    /// Reliables received ahead of the next expected seqnum.
    pub fn incoming_reliables(&self) -> &ReliablePacketBuffer {
        &self.incoming_reliables
    }

    /// Buffers a reliable datagram that is about to be sent.
    pub fn register_outgoing(&self, packet: BufferedPacket) -> Result<()> {
        let base = match (self.outgoing_reliables_sent.first_seqnum(), packet.seqnum()) {
            (Some(first), _) => first,
            (None, Some(seqnum)) => seqnum,
            (None, None) => self.read_outgoing_sequence_number(),
        };
        self.outgoing_reliables_sent.insert(packet, base)
    }

    /// Buffers a reliable datagram received ahead of order.
    pub fn buffer_incoming(&self, packet: BufferedPacket) -> Result<()> {
        let next = self.next_incoming_seqnum();
        self.incoming_reliables.insert(packet, next)
    }

    /// Feeds a SPLIT frame to the reassembly buffer.
    pub fn insert_split(&self, frame: &[u8], reliable: bool) -> Result<Option<Vec<u8>>> {
        self.split_buffer.lock().insert(frame, reliable)
    }

    /// Ages split entries and drops stale unreliable ones.
    pub fn remove_unreliable_timed_out_splits(&self, dtime: Duration, timeout: Duration) -> usize {
        self.split_buffer.lock().remove_unreliable_timed_outs(dtime, timeout)
    }

    /// Parks a reliable frame until a seqnum is free. Returns true if the queue is long.
    pub fn queue_reliable(&self, frame: Vec<u8>) -> bool {
        self.queued_reliables.lock().enqueue(frame)
    }

    /// Takes the oldest parked frame.
    pub fn dequeue_reliable(&self) -> Option<Vec<u8>> {
        self.queued_reliables.lock().dequeue()
    }

    /// Returns a parked frame to the front of the queue.
    pub fn requeue_reliable_front(&self, frame: Vec<u8>) {
        self.queued_reliables.lock().requeue_front(frame);
    }

    /// Number of parked frames.
    pub fn queued_reliables(&self) -> usize {
        self.queued_reliables.lock().len()
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    /// Counts `bytes` carried by `packets` sent datagrams.
    pub fn update_bytes_sent(&self, bytes: usize, packets: u32) {
        let mut state = self.state.lock();
        state.sent.record(bytes);
        state.packets_sent += u64::from(packets);
    }

    /// Counts `bytes` of resent data.
    pub fn update_bytes_lost(&self, bytes: usize) {
        self.state.lock().lost.record(bytes);
    }

    /// Counts `bytes` of received data.
    pub fn update_bytes_received(&self, bytes: usize) {
        self.state.lock().received.record(bytes);
    }

    /// Counts `count` timed-out reliables.
    pub fn update_packet_loss_counter(&self, count: u32) {
        let mut state = self.state.lock();
        state.current_packet_loss += count;
        state.packets_lost += u64::from(count);
    }

    /// Counts a reliable that arrived behind the window.
    pub fn update_packet_too_late_counter(&self) {
        let mut state = self.state.lock();
        state.current_packet_too_late += 1;
        state.packets_too_late += 1;
    }

    /// Counts an acknowledged reliable.
    pub fn update_packet_successful_counter(&self) {
        let mut state = self.state.lock();
        state.current_packet_successful += 1;
        state.packets_acked += 1;
    }

    /// Advances the statistics timers. Adapts the window every second and rolls the
    /// KB/s figures every ten seconds.
    pub fn update_timers(&self, dtime: Duration) {
        let mut state = self.state.lock();
        state.window_timer += dtime;
        state.rate_timer += dtime;

        if state.window_timer >= WINDOW_ADAPT_INTERVAL {
            state.window_timer -= WINDOW_ADAPT_INTERVAL;
            state.adapt_window();
        }
        if state.rate_timer >= RATE_INTERVAL {
            state.roll_rates();
        }
    }

    /// Snapshot of the channel statistics.
    pub fn stats(&self) -> ChannelStats {
        let state = self.state.lock();
        ChannelStats {
            window_size: state.window_size,
            outgoing_reliables: self.outgoing_reliables_sent.len(),
            incoming_reliables: self.incoming_reliables.len(),
            queued_reliables: self.queued_reliables.lock().len(),
            incomplete_splits: self.split_buffer.lock().len(),
            packets_sent: state.packets_sent,
            packets_lost: state.packets_lost,
            packets_too_late: state.packets_too_late,
            packets_acked: state.packets_acked,
            cur_kbps: state.sent.cur_kbps(),
            avg_kbps: state.sent.avg_kbps(),
            max_kbps: state.sent.max_kbps(),
            cur_incoming_kbps: state.received.cur_kbps(),
            avg_incoming_kbps: state.received.avg_kbps(),
            max_incoming_kbps: state.received.max_kbps(),
            cur_kbps_lost: state.lost.cur_kbps(),
            avg_kbps_lost: state.lost.avg_kbps(),
            max_kbps_lost: state.lost.max_kbps(),
        }
    }
}
