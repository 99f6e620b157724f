//! Header and frame decoding.
//!
//! Decoding is pure: it borrows from the datagram and never allocates. A header that
//! is cut short is reported as data corruption; an unknown tag or a forbidden
//! nesting is reported as invalid incoming data.

use std::{
    convert::TryFrom,
    io::{self, Cursor},
};

use byteorder::{BigEndian, ReadBytesExt};
use relink_core::{
    constants::{BASE_HEADER_SIZE, RELIABLE_HEADER_SIZE, SPLIT_HEADER_SIZE},
    error::{ErrorKind, Result},
};

use crate::packet::{BaseHeader, ControlType, PacketType, SequenceNumber};

/// Decoded CONTROL frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlFrame {
    /// Acknowledges `seqnum` on the datagram's channel.
    Ack {
        /// The acknowledged sequence number.
        seqnum: SequenceNumber,
    },
    /// Assigns `peer_id` to the receiver.
    SetPeerId {
        /// The new peer id.
        peer_id: u16,
    },
    /// Keepalive.
    Ping,
    /// The sender disconnects.
    Disco,
    /// The sender supports the adaptive send window.
    EnableBigSendWindow,
}

/// A frame borrowed from a datagram.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Protocol-internal message.
    Control(ControlFrame),
    /// Application payload, possibly empty.
    Original(&'a [u8]),
    /// One chunk of a larger payload.
    Split {
        /// Split sequence number shared by all chunks of one payload.
        seqnum: SequenceNumber,
        /// Total number of chunks.
        chunk_count: u16,
        /// Index of this chunk.
        chunk_num: u16,
        /// Chunk bytes.
        data: &'a [u8],
    },
    /// Reliable wrapper around another (non-reliable) frame.
    Reliable {
        /// Reliable sequence number.
        seqnum: SequenceNumber,
        /// The wrapped frame, undecoded.
        inner: &'a [u8],
    },
}

/// Parses datagrams and frames.
pub struct PacketDecoder;

impl PacketDecoder {
    /// Reads the base header. The datagram must also carry at least a type tag.
    pub fn read_base_header(datagram: &[u8]) -> Result<BaseHeader> {
        if datagram.len() < BASE_HEADER_SIZE + 1 {
            return Err(ErrorKind::InvalidIncomingData("datagram shorter than base header"));
        }
        let mut cursor = Cursor::new(datagram);
        Ok(BaseHeader {
            protocol_id: cursor.read_u32::<BigEndian>().map_err(short_base_header)?,
            sender_peer_id: cursor.read_u16::<BigEndian>().map_err(short_base_header)?,
            channel: cursor.read_u8().map_err(short_base_header)?,
        })
    }

    /// Returns the frame that follows the base header.
    pub fn frame_bytes(datagram: &[u8]) -> &[u8] {
        datagram.get(BASE_HEADER_SIZE..).unwrap_or(&[])
    }

    /// Decodes one frame (the bytes after the base header).
    pub fn decode_frame(frame: &[u8]) -> Result<Frame<'_>> {
        let (&tag, body) = frame.split_first().ok_or(ErrorKind::DataCorruption("empty frame"))?;

        match PacketType::try_from(tag)? {
            PacketType::Control => Ok(Frame::Control(Self::decode_control(body)?)),
            PacketType::Original => Ok(Frame::Original(body)),
            PacketType::Split => {
                if frame.len() < SPLIT_HEADER_SIZE {
                    return Err(ErrorKind::DataCorruption("truncated split header"));
                }
                let mut cursor = Cursor::new(body);
                let seqnum = read_u16(&mut cursor)?;
                let chunk_count = read_u16(&mut cursor)?;
                let chunk_num = read_u16(&mut cursor)?;
                Ok(Frame::Split { seqnum, chunk_count, chunk_num, data: &frame[SPLIT_HEADER_SIZE..] })
            }
            PacketType::Reliable => {
                if frame.len() < RELIABLE_HEADER_SIZE {
                    return Err(ErrorKind::DataCorruption("truncated reliable header"));
                }
                let seqnum = read_u16(&mut Cursor::new(body))?;
                let inner = &frame[RELIABLE_HEADER_SIZE..];
                match inner.first() {
                    None => Err(ErrorKind::DataCorruption("reliable frame without payload")),
                    Some(&t) if t == PacketType::Reliable as u8 => {
                        Err(ErrorKind::InvalidIncomingData("nested reliable frame"))
                    }
                    Some(_) => Ok(Frame::Reliable { seqnum, inner }),
                }
            }
        }
    }

    fn decode_control(body: &[u8]) -> Result<ControlFrame> {
        let mut cursor = Cursor::new(body);
        let control_type = cursor
            .read_u8()
            .map_err(|_| ErrorKind::DataCorruption("truncated control header"))?;

        match ControlType::try_from(control_type)? {
            ControlType::Ack => Ok(ControlFrame::Ack { seqnum: read_u16(&mut cursor)? }),
            ControlType::SetPeerId => Ok(ControlFrame::SetPeerId { peer_id: read_u16(&mut cursor)? }),
            ControlType::Ping => Ok(ControlFrame::Ping),
            ControlType::Disco => Ok(ControlFrame::Disco),
            ControlType::EnableBigSendWindow => Ok(ControlFrame::EnableBigSendWindow),
        }
    }
}

fn short_base_header(_: io::Error) -> ErrorKind {
    ErrorKind::InvalidIncomingData("datagram shorter than base header")
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    cursor
        .read_u16::<BigEndian>()
        .map_err(|_| ErrorKind::DataCorruption("truncated header field"))
}
