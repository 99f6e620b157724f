//! Datagram framing and parsing.
//!
//! Every datagram is a 7-byte base header followed by one frame. A frame is one of:
//!
//! ```text
//! CONTROL   [0][controltype] (+ u16 for ACK and SET_PEER_ID)
//! ORIGINAL  [1] payload
//! SPLIT     [2][u16 seqnum][u16 chunk_count][u16 chunk_num] chunk
//! RELIABLE  [3][u16 seqnum] inner frame (never another RELIABLE)
//! ```
//!
//! All integers are big-endian.
//!
//! # Module Organization
//!
//! - [`encoder`] - frame and datagram construction, splitting
//! - [`decoder`] - header and frame parsing

pub mod decoder;
pub mod encoder;


pub use decoder::{ControlFrame, Frame, PacketDecoder};
pub use encoder::PacketEncoder;
