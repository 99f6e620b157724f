#![warn(missing_docs)]

//! relink-protocol: wire format, sequence arithmetic and reliable buffers.

/// Datagram encoding and decoding.
pub mod codec;
/// Frame type tags and buffered packets.
pub mod packet;
/// Rolling throughput counters.
pub mod rate;
/// Ordered buffers of reliable datagrams.
pub mod reliable_buffer;
/// Round-trip time estimation and resend timeout.
pub mod rtt;
/// Wrapping 16-bit sequence number comparisons.
pub mod seqnum;

pub use codec::{ControlFrame, Frame, PacketDecoder, PacketEncoder};
pub use packet::{BaseHeader, BufferedPacket, ControlType, PacketType, SequenceNumber};
pub use rate::RateCounter;
pub use reliable_buffer::ReliablePacketBuffer;
pub use rtt::RttEstimator;
