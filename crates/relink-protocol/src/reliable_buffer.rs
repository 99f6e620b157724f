//! Ordered store of reliable datagrams.
//!
//! Each channel owns two of these: one for datagrams sent and not yet acknowledged,
//! one for datagrams received ahead of the next expected sequence number. Both are
//! touched by the send and the receive thread, so every operation takes the buffer's
//! lock for its whole duration.

use std::{collections::VecDeque, time::Duration};

use parking_lot::Mutex;
use relink_core::{
    constants::MAX_RELIABLE_WINDOW_SIZE,
    error::{ErrorKind, Result},
};

use crate::{
    packet::{BufferedPacket, SequenceNumber},
    seqnum::seqnum_in_window,
};

#[derive(Debug)]
struct Entry {
    seqnum: SequenceNumber,
    packet: BufferedPacket,
}

/// Reliable datagrams ordered by circular distance from the next expected seqnum,
/// so the logically oldest entry is always at the front, across wraparound.
#[derive(Debug, Default)]
pub struct ReliablePacketBuffer {
    entries: Mutex<VecDeque<Entry>>,
}

impl ReliablePacketBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a RELIABLE datagram.
    ///
    /// `next_expected` is the base of the window the seqnum must fall in; entries are
    /// kept sorted by their distance from it. Fails with `AlreadyExists` for an exact
    /// duplicate, and with `DataCorruption` for a non-reliable datagram, a seqnum
    /// outside the window, or a duplicate seqnum carrying different bytes.
    pub fn insert(&self, packet: BufferedPacket, next_expected: SequenceNumber) -> Result<()> {
        let seqnum =
            packet.seqnum().ok_or(ErrorKind::DataCorruption("buffering a non-reliable packet"))?;
        if !seqnum_in_window(seqnum, next_expected, u32::from(MAX_RELIABLE_WINDOW_SIZE)) {
            return Err(ErrorKind::DataCorruption("seqnum outside of the reliable window"));
        }

        let distance = seqnum.wrapping_sub(next_expected);
        let mut entries = self.entries.lock();
        let index =
            entries.partition_point(|e| e.seqnum.wrapping_sub(next_expected) < distance);

        if let Some(existing) = entries.get(index) {
            if existing.seqnum == seqnum {
                return if existing.packet.data == packet.data {
                    Err(ErrorKind::AlreadyExists)
                } else {
                    Err(ErrorKind::DataCorruption("same seqnum with different data"))
                };
            }
        }
        entries.insert(index, Entry { seqnum, packet });
        Ok(())
    }

    /// Removes and returns the front entry.
    pub fn pop_first(&self) -> Result<BufferedPacket> {
        self.entries.lock().pop_front().map(|e| e.packet).ok_or(ErrorKind::NotFound)
    }

    /// Removes the entry with `seqnum`. Fails with `NotFound`, leaving the buffer as it
    /// was, if there is none.
    pub fn pop_seqnum(&self, seqnum: SequenceNumber) -> Result<BufferedPacket> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|e| e.seqnum == seqnum).ok_or(ErrorKind::NotFound)?;
        entries.remove(index).map(|e| e.packet).ok_or(ErrorKind::NotFound)
    }

    /// Sequence number of the front entry.
    pub fn first_seqnum(&self) -> Option<SequenceNumber> {
        self.entries.lock().front().map(|e| e.seqnum)
    }

    /// Advances both timers of every entry by `dtime`.
    pub fn increment_timeouts(&self, dtime: Duration) {
        for entry in self.entries.lock().iter_mut() {
            entry.packet.time += dtime;
            entry.packet.totaltime += dtime;
        }
    }

    /// Returns copies of up to `max_packets` entries whose per-attempt timer reached
    /// `timeout`, front first. The entries stay buffered and their per-attempt timer is
    /// reset, since the caller is about to resend them.
    pub fn timed_outs(&self, timeout: Duration, max_packets: usize) -> Vec<BufferedPacket> {
        let mut timed_outs = Vec::new();
        if max_packets == 0 {
            return timed_outs;
        }
        for entry in self.entries.lock().iter_mut() {
            if entry.packet.time >= timeout {
                timed_outs.push(entry.packet.clone());
                entry.packet.time = Duration::ZERO;
                if timed_outs.len() >= max_packets {
                    break;
                }
            }
        }
        timed_outs
    }

    /// Returns true if an entry with `seqnum` is buffered.
    pub fn contains(&self, seqnum: SequenceNumber) -> bool {
        self.entries.lock().iter().any(|e| e.seqnum == seqnum)
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Buffered sequence numbers, front first.
    #[cfg(test)]
    pub(crate) fn seqnums(&self) -> Vec<SequenceNumber> {
        self.entries.lock().iter().map(|e| e.seqnum).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::codec::PacketEncoder;

    fn addr() -> SocketAddr {
        "127.0.0.1:30000".parse().unwrap()
    }

    fn reliable(seqnum: u16, payload: &[u8]) -> BufferedPacket {
        let frame = PacketEncoder::make_reliable(&PacketEncoder::make_original(payload), seqnum);
        BufferedPacket::new(PacketEncoder::make_packet(1, 2, 0, &frame), addr())
    }

    #[test]
    fn test_insert_then_pop_seqnum_returns_same_bytes() {
        let buffer = ReliablePacketBuffer::new();
        let packet = reliable(65500, b"payload");
        buffer.insert(packet.clone(), 65500).unwrap();

        let popped = buffer.pop_seqnum(65500).unwrap();
        assert_eq!(popped.data, packet.data);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_pop_seqnum_not_found_leaves_buffer_unchanged() {
        let buffer = ReliablePacketBuffer::new();
        buffer.insert(reliable(10, b"a"), 10).unwrap();
        buffer.insert(reliable(11, b"b"), 10).unwrap();

        assert!(matches!(buffer.pop_seqnum(12), Err(ErrorKind::NotFound)));
        assert_eq!(buffer.seqnums(), vec![10, 11]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_ordering_across_wraparound() {
        let buffer = ReliablePacketBuffer::new();
        for seqnum in [3u16, 65534, 0, 65530, 65535] {
            buffer.insert(reliable(seqnum, &[seqnum as u8]), 65530).unwrap();
        }
        assert_eq!(buffer.first_seqnum(), Some(65530));
        assert_eq!(buffer.seqnums(), vec![65530, 65534, 65535, 0, 3]);

        assert_eq!(buffer.pop_first().unwrap().seqnum(), Some(65530));
        assert_eq!(buffer.first_seqnum(), Some(65534));
    }

    #[test]
    fn test_duplicates() {
        let buffer = ReliablePacketBuffer::new();
        buffer.insert(reliable(5, b"same"), 0).unwrap();
        assert!(matches!(buffer.insert(reliable(5, b"same"), 0), Err(ErrorKind::AlreadyExists)));
        assert!(matches!(
            buffer.insert(reliable(5, b"different"), 0),
            Err(ErrorKind::DataCorruption(_))
        ));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_rejects_out_of_window_and_unreliable() {
        let buffer = ReliablePacketBuffer::new();
        assert!(buffer.insert(reliable(100, b"x"), 100u16.wrapping_add(0x8000)).is_err());

        let original = BufferedPacket::new(
            PacketEncoder::make_packet(1, 2, 0, &PacketEncoder::make_original(b"x")),
            addr(),
        );
        assert!(matches!(buffer.insert(original, 0), Err(ErrorKind::DataCorruption(_))));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_pop_first_on_empty() {
        let buffer = ReliablePacketBuffer::new();
        assert!(matches!(buffer.pop_first(), Err(ErrorKind::NotFound)));
        assert_eq!(buffer.first_seqnum(), None);
    }

    #[test]
    fn test_timed_outs_reset_timer_and_respect_max() {
        let buffer = ReliablePacketBuffer::new();
        for seqnum in 0..5u16 {
            buffer.insert(reliable(seqnum, b"t"), 0).unwrap();
        }
        buffer.increment_timeouts(Duration::from_millis(300));

        let resend = buffer.timed_outs(Duration::from_millis(250), 3);
        assert_eq!(resend.iter().filter_map(|p| p.seqnum()).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(buffer.len(), 5);

        // Claimed entries start over; the other two are still due.
        let again = buffer.timed_outs(Duration::from_millis(250), 10);
        assert_eq!(again.iter().filter_map(|p| p.seqnum()).collect::<Vec<_>>(), vec![3, 4]);
        assert!(buffer.timed_outs(Duration::from_millis(250), 10).is_empty());

        let total = buffer.pop_seqnum(0).unwrap().totaltime;
        assert_eq!(total, Duration::from_millis(300));
    }

    #[test]
    fn test_random_insertion_order_pops_in_sequence() {
        use rand::seq::SliceRandom;

        let start = 65500u16;
        let mut seqnums: Vec<u16> = (0..200u16).map(|i| start.wrapping_add(i)).collect();
        seqnums.shuffle(&mut rand::rng());

        let buffer = ReliablePacketBuffer::new();
        for &seqnum in &seqnums {
            buffer.insert(reliable(seqnum, b"r"), start).unwrap();
        }
        for i in 0..200u16 {
            assert_eq!(buffer.pop_first().unwrap().seqnum(), Some(start.wrapping_add(i)));
        }
    }

    #[test]
    fn test_contains() {
        let buffer = ReliablePacketBuffer::new();
        buffer.insert(reliable(42, b"x"), 40).unwrap();
        assert!(buffer.contains(42));
        assert!(!buffer.contains(41));
    }
}
