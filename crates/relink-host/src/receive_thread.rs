//! The receive pipeline.
//!
//! Reads datagrams, maps them to peers and walks their frames: reliables are
//! acknowledged and delivered in order, ACKs release the outgoing buffer, splits are
//! reassembled, and complete payloads become [`ConnectionEvent::DataReceived`].

use std::{io, net::SocketAddr, sync::Arc};

use relink_core::{
    constants::{CHANNEL_COUNT, MAX_RELIABLE_WINDOW_SIZE, PEER_ID_INEXISTENT},
    error::{ErrorKind, Result},
    transport::DatagramSocket,
};
use relink_peer::{Channel, Peer, PeerHandle};
use relink_protocol::{
    seqnum::seqnum_in_window, BufferedPacket, ControlFrame, Frame, PacketDecoder, SequenceNumber,
};
use tracing::{debug, trace, warn};

use crate::{
    event_types::{ConnectionCommand, ConnectionEvent},
    state::SharedState,
};

/// The peer and channel a datagram was received for.
struct Context<'a> {
    peer: &'a Peer,
    channel_num: u8,
    channel: &'a Channel,
}

pub(crate) struct ReceiveThread {
    shared: Arc<SharedState>,
}

impl ReceiveThread {
    pub fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    pub fn run(self) {
        debug!("{}: receive thread started", self.shared.describe());
        let mut buffer = vec![0u8; self.shared.config.receive_buffer_size];

        while !self.shared.is_shutdown() {
            let (len, address) = match self.shared.transport.recv_from(&mut buffer) {
                Ok(received) => received,
                Err(err) if is_timeout(&err) => continue,
                Err(err) => {
                    debug!("{}: receive failed: {}", self.shared.describe(), err);
                    continue;
                }
            };

            let datagram = &mut buffer[..len];
            if !self.shared.intercept_receive(&address, datagram) {
                continue;
            }
            if let Err(err) = self.process_datagram(address, datagram) {
                self.log_dropped(&address, &err);
            }
        }
        debug!("{}: receive thread stopped", self.shared.describe());
    }

    fn log_dropped(&self, address: &SocketAddr, err: &ErrorKind) {
        match err {
            ErrorKind::InvalidIncomingData(_) => {
                trace!("{}: dropped datagram from {}: {}", self.shared.describe(), address, err)
            }
            ErrorKind::DataCorruption(_) => {
                warn!("{}: dropped datagram from {}: {}", self.shared.describe(), address, err)
            }
            err if err.is_benign() => {
                trace!("{}: datagram from {}: {}", self.shared.describe(), address, err)
            }
            _ => debug!("{}: error handling datagram from {}: {}", self.shared.describe(), address, err),
        }
    }

    fn process_datagram(&self, address: SocketAddr, datagram: &[u8]) -> Result<()> {
        let header = PacketDecoder::read_base_header(datagram)?;
        if header.protocol_id != self.shared.config.protocol_id {
            return Err(ErrorKind::InvalidIncomingData("protocol id mismatch"));
        }
        if header.channel >= CHANNEL_COUNT {
            return Err(ErrorKind::InvalidIncomingData("channel out of range"));
        }

        let Some(peer) = self.resolve_peer(header.sender_peer_id, address)? else {
            return Ok(());
        };
        let Some(peer) = PeerHandle::checkout(&peer) else {
            return Ok(());
        };

        peer.reset_timeout();
        let channel = peer.channel(header.channel)?;
        channel.update_bytes_received(datagram.len());
        if header.sender_peer_id != PEER_ID_INEXISTENT && peer.activate() {
            trace!("{}: peer {} identified", self.shared.describe(), peer.id());
        }

        let ctx = Context { peer: &peer, channel_num: header.channel, channel };
        let frame = PacketDecoder::frame_bytes(datagram);
        match PacketDecoder::decode_frame(frame)? {
            Frame::Reliable { seqnum, inner } => self.process_reliable(&ctx, datagram, seqnum, inner),
            other => self.process_frame(&ctx, other, frame, false),
        }
    }

    /// Maps a datagram to its peer, creating the peer on a server. `None` drops it.
    fn resolve_peer(&self, sender_peer_id: u16, address: SocketAddr) -> Result<Option<Arc<Peer>>> {
        if sender_peer_id != PEER_ID_INEXISTENT {
            return Ok(match self.shared.peers.get(sender_peer_id) {
                Some(peer) if peer.address() == address => Some(peer),
                Some(peer) => {
                    trace!(
                        "{}: peer {} sent from {} instead of {}",
                        self.shared.describe(),
                        sender_peer_id,
                        address,
                        peer.address()
                    );
                    None
                }
                None => {
                    trace!("{}: unknown sender id {} from {}", self.shared.describe(), sender_peer_id, address);
                    None
                }
            });
        }

        if let Some(peer) = self.shared.peers.find_by_address(&address) {
            return Ok(Some(peer));
        }
        if !self.shared.is_server() {
            trace!("{}: unidentified datagram from {}", self.shared.describe(), address);
            return Ok(None);
        }

        let peer = self.shared.peers.create_remote(address)?;
        debug!("{}: new peer {} at {}", self.shared.describe(), peer.id(), address);
        self.shared.push_event(ConnectionEvent::PeerAdded { peer_id: peer.id(), address });
        self.shared.put_command(ConnectionCommand::CreatePeer { peer_id: peer.id() });
        Ok(Some(peer))
    }

    fn process_reliable(
        &self,
        ctx: &Context<'_>,
        datagram: &[u8],
        seqnum: SequenceNumber,
        inner: &[u8],
    ) -> Result<()> {
        let next = ctx.channel.next_incoming_seqnum();
        self.shared.put_command(ConnectionCommand::Ack {
            peer_id: ctx.peer.id(),
            channel: ctx.channel_num,
            seqnum,
        });

        if !seqnum_in_window(seqnum, next, u32::from(MAX_RELIABLE_WINDOW_SIZE)) {
            // Our ACK got lost; the re-ACK above stops the resends.
            ctx.channel.update_packet_too_late_counter();
            trace!(
                "{}: late reliable {} from peer {} (expected {})",
                self.shared.describe(),
                seqnum,
                ctx.peer.id(),
                next
            );
            return Ok(());
        }

        if seqnum != next {
            let packet = BufferedPacket::new(datagram.to_vec(), ctx.peer.address());
            return match ctx.channel.buffer_incoming(packet) {
                Err(ErrorKind::AlreadyExists) => Ok(()),
                other => other,
            };
        }

        ctx.channel.inc_next_incoming_seqnum();
        if let Err(err) = self.process_inner(ctx, inner) {
            self.log_dropped(&ctx.peer.address(), &err);
        }
        self.drain_incoming_reliables(ctx)
    }

    /// Delivers buffered reliables that have become next in line.
    fn drain_incoming_reliables(&self, ctx: &Context<'_>) -> Result<()> {
        let incoming = ctx.channel.incoming_reliables();
        while incoming.first_seqnum() == Some(ctx.channel.next_incoming_seqnum()) {
            let packet = incoming.pop_first()?;
            ctx.channel.inc_next_incoming_seqnum();
            let inner = packet.inner().ok_or(ErrorKind::DataCorruption("buffered reliable without payload"))?;
            if let Err(err) = self.process_inner(ctx, &inner) {
                self.log_dropped(&ctx.peer.address(), &err);
            }
        }
        Ok(())
    }

    fn process_inner(&self, ctx: &Context<'_>, inner: &[u8]) -> Result<()> {
        let frame = PacketDecoder::decode_frame(inner)?;
        self.process_frame(ctx, frame, inner, true)
    }

    fn process_frame(&self, ctx: &Context<'_>, frame: Frame<'_>, raw: &[u8], reliable: bool) -> Result<()> {
        match frame {
            Frame::Control(control) => self.process_control(ctx, control),
            Frame::Original(data) => {
                self.deliver(ctx.peer.id(), data.to_vec());
                Ok(())
            }
            Frame::Split { .. } => {
                if let Some(data) = ctx.channel.insert_split(raw, reliable)? {
                    self.deliver(ctx.peer.id(), data);
                }
                Ok(())
            }
            Frame::Reliable { .. } => Err(ErrorKind::InvalidIncomingData("nested reliable frame")),
        }
    }

    fn process_control(&self, ctx: &Context<'_>, control: ControlFrame) -> Result<()> {
        match control {
            ControlFrame::Ack { seqnum } => {
                let packet = ctx.channel.outgoing_reliables().pop_seqnum(seqnum)?;
                ctx.peer.report_rtt(packet.totaltime);
                ctx.channel.update_packet_successful_counter();
                // Window space may have freed up for parked reliables.
                self.shared.wake_send_thread();
            }
            ControlFrame::SetPeerId { peer_id } => {
                if self.shared.local_peer_id() != PEER_ID_INEXISTENT {
                    trace!("{}: ignoring peer id {}, already assigned", self.shared.describe(), peer_id);
                    return Ok(());
                }
                self.shared.set_local_peer_id(peer_id);
                debug!("{}: got peer id {} from peer {}", self.shared.describe(), peer_id, ctx.peer.id());
                if self.shared.config.request_big_send_window {
                    self.shared
                        .put_command(ConnectionCommand::EnableBigSendWindow { peer_id: ctx.peer.id() });
                }
            }
            ControlFrame::Ping => {}
            ControlFrame::Disco => {
                debug!("{}: peer {} disconnected", self.shared.describe(), ctx.peer.id());
                self.shared.delete_peer(ctx.peer.id(), false);
            }
            ControlFrame::EnableBigSendWindow => {
                if ctx.peer.enable_big_send_window(self.shared.config.initial_window_size) {
                    debug!("{}: peer {} lifted its legacy window", self.shared.describe(), ctx.peer.id());
                }
            }
        }
        Ok(())
    }

    fn deliver(&self, peer_id: u16, data: Vec<u8>) {
        // Empty ORIGINALs only announce a new client.
        if data.is_empty() {
            return;
        }
        self.shared.push_event(ConnectionEvent::DataReceived { peer_id, data });
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
