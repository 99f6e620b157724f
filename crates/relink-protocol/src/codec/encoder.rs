//! Frame and datagram encoding.
//!
//! Every builder writes into a freshly sized `Vec<u8>`. Only splitting can fail, when
//! a payload needs more chunks than a `u16` can count.

use byteorder::{BigEndian, ByteOrder};
use relink_core::{
    constants::{
        BASE_HEADER_SIZE, CONTROL_HEADER_SIZE, ORIGINAL_HEADER_SIZE, RELIABLE_HEADER_SIZE,
        SPLIT_HEADER_SIZE,
    },
    error::{ErrorKind, Result},
};

use crate::packet::{ControlType, EnumConverter, PacketType, SequenceNumber};

/// Builds frames and datagrams.
pub struct PacketEncoder;

impl PacketEncoder {
    /// Prepends the base header to `frame`, producing a complete datagram.
    pub fn make_packet(protocol_id: u32, sender_peer_id: u16, channel: u8, frame: &[u8]) -> Vec<u8> {
        let mut buffer = vec![0u8; BASE_HEADER_SIZE + frame.len()];
        BigEndian::write_u32(&mut buffer[0..4], protocol_id);
        BigEndian::write_u16(&mut buffer[4..6], sender_peer_id);
        buffer[6] = channel;
        buffer[BASE_HEADER_SIZE..].copy_from_slice(frame);
        buffer
    }

    /// Wraps an application payload into an ORIGINAL frame.
    pub fn make_original(data: &[u8]) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(ORIGINAL_HEADER_SIZE + data.len());
        buffer.push(PacketType::Original.to_u8());
        buffer.extend_from_slice(data);
        buffer
    }

    /// Cuts `data` into `ceil(len / chunk_size_max)` SPLIT frames sharing `seqnum`,
    /// numbered from 0.
    ///
    /// Fails with `InvalidOutgoingData` if that takes more than 65535 chunks.
    pub fn make_split(data: &[u8], chunk_size_max: usize, seqnum: SequenceNumber) -> Result<Vec<Vec<u8>>> {
        let chunk_size_max = chunk_size_max.max(1);
        let chunk_count = u16::try_from(data.len().div_ceil(chunk_size_max))
            .map_err(|_| ErrorKind::InvalidOutgoingData("payload needs more than 65535 chunks"))?;

        // chunk_num < chunk_count, so it fits as well.
        let frames = data
            .chunks(chunk_size_max)
            .zip(0..chunk_count)
            .map(|(chunk, chunk_num)| {
                let mut frame = vec![0u8; SPLIT_HEADER_SIZE + chunk.len()];
                frame[0] = PacketType::Split.to_u8();
                BigEndian::write_u16(&mut frame[1..3], seqnum);
                BigEndian::write_u16(&mut frame[3..5], chunk_count);
                BigEndian::write_u16(&mut frame[5..7], chunk_num);
                frame[SPLIT_HEADER_SIZE..].copy_from_slice(chunk);
                frame
            })
            .collect();
        Ok(frames)
    }

    /// Produces a single ORIGINAL frame when `data` fits in one chunk, otherwise SPLIT
    /// frames tagged with `*split_seqnum`, which is then advanced. On error the split
    /// seqnum is left as it was.
    pub fn make_auto_split(
        data: &[u8],
        chunk_size_max: usize,
        split_seqnum: &mut SequenceNumber,
    ) -> Result<Vec<Vec<u8>>> {
        if data.len() <= chunk_size_max {
            return Ok(vec![Self::make_original(data)]);
        }
        let frames = Self::make_split(data, chunk_size_max, *split_seqnum)?;
        *split_seqnum = split_seqnum.wrapping_add(1);
        Ok(frames)
    }

    /// Wraps `frame` into a RELIABLE frame carrying `seqnum`.
    pub fn make_reliable(frame: &[u8], seqnum: SequenceNumber) -> Vec<u8> {
        let mut buffer = vec![0u8; RELIABLE_HEADER_SIZE + frame.len()];
        buffer[0] = PacketType::Reliable.to_u8();
        BigEndian::write_u16(&mut buffer[1..3], seqnum);
        buffer[RELIABLE_HEADER_SIZE..].copy_from_slice(frame);
        buffer
    }

    /// CONTROL ACK for `seqnum`.
    pub fn make_ack(seqnum: SequenceNumber) -> Vec<u8> {
        Self::make_control_u16(ControlType::Ack, seqnum)
    }

    /// CONTROL SET_PEER_ID assigning `peer_id` to the receiver.
    pub fn make_set_peer_id(peer_id: u16) -> Vec<u8> {
        Self::make_control_u16(ControlType::SetPeerId, peer_id)
    }

    /// CONTROL PING.
    pub fn make_ping() -> Vec<u8> {
        Self::make_control(ControlType::Ping)
    }

    /// CONTROL DISCO.
    pub fn make_disco() -> Vec<u8> {
        Self::make_control(ControlType::Disco)
    }

    /// CONTROL ENABLE_BIG_SEND_WINDOW.
    pub fn make_enable_big_send_window() -> Vec<u8> {
        Self::make_control(ControlType::EnableBigSendWindow)
    }

    fn make_control(control_type: ControlType) -> Vec<u8> {
        vec![PacketType::Control.to_u8(), control_type.to_u8()]
    }

    fn make_control_u16(control_type: ControlType, value: u16) -> Vec<u8> {
        let mut buffer = vec![0u8; CONTROL_HEADER_SIZE + 2];
        buffer[0] = PacketType::Control.to_u8();
        buffer[1] = control_type.to_u8();
        BigEndian::write_u16(&mut buffer[2..4], value);
        buffer
    }
}
