//! Reassembly of SPLIT frames.
//!
//! A payload too large for one datagram travels as `chunk_count` SPLIT frames sharing
//! one split sequence number. Chunks are collected per seqnum and concatenated in
//! index order once the set is complete.
//!
//! # Lifecycle
//!
//! 1. **Collection**: the first chunk of a seqnum creates an [`IncomingSplitPacket`];
//!    later chunks fill it in. A repeated chunk index overwrites the stored bytes.
//! 2. **Completion**: the chunks are joined, the entry is removed and the seqnum is
//!    remembered for a while so that late duplicates do not open a new entry.
//! 3. **Timeout**: an unreliable entry that stops receiving chunks is dropped after
//!    the timeout. Reliable entries are never evicted since their chunks are resent.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use relink_core::error::{ErrorKind, Result};
use relink_protocol::{Frame, PacketDecoder, SequenceNumber};

/// Number of completed split seqnums remembered to ignore late duplicates.
pub const RECENTLY_COMPLETED_CAPACITY: usize = 64;

/// Chunks received so far for one split seqnum.
#[derive(Debug)]
pub struct IncomingSplitPacket {
    /// Chunk bytes by chunk index
    chunks: HashMap<u16, Vec<u8>>,
    /// Number of chunks the payload was cut into
    chunk_count: u16,
    /// Time since the entry last grew
    time: Duration,
    /// Whether any chunk arrived inside a RELIABLE frame
    reliable: bool,
}

impl IncomingSplitPacket {
    fn new(chunk_count: u16, reliable: bool) -> Self {
        Self { chunks: HashMap::new(), chunk_count, time: Duration::ZERO, reliable }
    }

    /// Returns true once every chunk index is present.
    pub fn is_complete(&self) -> bool {
        self.chunks.len() == usize::from(self.chunk_count)
    }

    /// Joins the chunks in ascending index order.
    fn reassemble(mut self) -> Option<Vec<u8>> {
        let mut payload = Vec::with_capacity(self.chunks.values().map(Vec::len).sum());
        for chunk_num in 0..self.chunk_count {
            payload.extend_from_slice(&self.chunks.remove(&chunk_num)?);
        }
        Some(payload)
    }
}

/// Split reassembly state of one channel.
#[derive(Debug, Default)]
pub struct IncomingSplitBuffer {
    packets: HashMap<SequenceNumber, IncomingSplitPacket>,
    recently_completed: VecDeque<SequenceNumber>,
}

impl IncomingSplitBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one SPLIT frame (base header already stripped).
    ///
    /// Returns the reassembled payload when this chunk completes its set, and `None`
    /// while chunks are missing or when the chunk is dropped.
    pub fn insert(&mut self, frame: &[u8], reliable: bool) -> Result<Option<Vec<u8>>> {
        let (seqnum, chunk_count, chunk_num, data) = match PacketDecoder::decode_frame(frame)? {
            Frame::Split { seqnum, chunk_count, chunk_num, data } => {
                (seqnum, chunk_count, chunk_num, data)
            }
            _ => return Err(ErrorKind::InvalidIncomingData("not a split frame")),
        };

        if chunk_num >= chunk_count {
            return Err(ErrorKind::DataCorruption("split chunk index out of range"));
        }

        if self.recently_completed.contains(&seqnum) {
            tracing::trace!("Ignoring chunk {} of already completed split {}", chunk_num, seqnum);
            return Ok(None);
        }

        let packet = self
            .packets
            .entry(seqnum)
            .or_insert_with(|| IncomingSplitPacket::new(chunk_count, reliable));

        if packet.chunk_count != chunk_count {
            tracing::warn!(
                "Dropping chunk {} of split {}: chunk count {} does not match {}",
                chunk_num,
                seqnum,
                chunk_count,
                packet.chunk_count
            );
            return Ok(None);
        }

        packet.reliable |= reliable;
        packet.time = Duration::ZERO;
        packet.chunks.insert(chunk_num, data.to_vec());

        if !packet.is_complete() {
            return Ok(None);
        }

        let payload = self.packets.remove(&seqnum).and_then(IncomingSplitPacket::reassemble);
        self.remember_completed(seqnum);
        Ok(payload)
    }

    /// Ages every entry by `dtime` and drops unreliable entries idle for `timeout` or
    /// longer. Returns the number of entries dropped.
    pub fn remove_unreliable_timed_outs(&mut self, dtime: Duration, timeout: Duration) -> usize {
        let before = self.packets.len();
        self.packets.retain(|_, packet| {
            packet.time += dtime;
            packet.reliable || packet.time < timeout
        });

        let removed = before - self.packets.len();
        if removed > 0 {
            tracing::warn!("Removed {} incomplete unreliable split packet(s) after {:?}", removed, timeout);
        }
        removed
    }

    /// Number of incomplete payloads.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Returns true if no payload is being reassembled.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    fn remember_completed(&mut self, seqnum: SequenceNumber) {
        if self.recently_completed.len() >= RECENTLY_COMPLETED_CAPACITY {
            self.recently_completed.pop_front();
        }
        self.recently_completed.push_back(seqnum);
    }
}
