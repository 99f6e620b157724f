//! The send pipeline.
//!
//! One thread per connection. Each iteration it:
//! 1. runs timers: peer timeouts, reliable resends, window statistics, keepalives and
//!    reliables parked on a full window
//! 2. turns commands into outgoing frames
//! 3. puts queued frames on the wire, sharing a per-iteration budget among peers
//! 4. sleeps until a command arrives, an ACK frees window space, or the idle timeout
//!    runs out

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{select, Receiver, TryRecvError};
use relink_core::{
    constants::{PEER_ID_INEXISTENT, PEER_ID_SERVER},
    error::{ErrorKind, Result},
};
use relink_peer::{Channel, Peer, PeerHandle};
use relink_protocol::{BufferedPacket, PacketEncoder};
use tracing::{debug, error, trace, warn};

use crate::{
    event_types::{ConnectionCommand, ConnectionEvent, OutgoingPacket},
    state::SharedState,
};

pub(crate) struct SendThread {
    shared: Arc<SharedState>,
    commands: Receiver<ConnectionCommand>,
    wake: Receiver<()>,
    outgoing: VecDeque<OutgoingPacket>,
    last_iteration: Instant,
}

impl SendThread {
    pub fn new(
        shared: Arc<SharedState>,
        commands: Receiver<ConnectionCommand>,
        wake: Receiver<()>,
    ) -> Self {
        Self { shared, commands, wake, outgoing: VecDeque::new(), last_iteration: Instant::now() }
    }

    pub fn run(mut self) {
        debug!("{}: send thread started", self.shared.describe());
        while !self.shared.is_shutdown() {
            let now = Instant::now();
            let dtime = now.duration_since(self.last_iteration);
            self.last_iteration = now;

            self.run_timeouts(dtime);

            for _ in 0..self.shared.config.max_commands_per_iteration {
                match self.commands.try_recv() {
                    Ok(command) => self.process_command(command),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }

            self.send_packets();

            if self.outgoing.is_empty() && self.commands.is_empty() {
                self.sleep();
            }
        }
        debug!("{}: send thread stopped", self.shared.describe());
    }

    fn sleep(&mut self) {
        let timeout = self.shared.config.send_thread_sleep;
        let command = select! {
            recv(self.commands) -> command => command.ok(),
            recv(self.wake) -> _ => None,
            default(timeout) => None,
        };
        if let Some(command) = command {
            self.process_command(command);
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    fn run_timeouts(&mut self, dtime: Duration) {
        let config = &self.shared.config;
        let peers = self.shared.peers.snapshot();
        let quota = packet_quota(config.max_packets_per_iteration, peers.len());
        let mut timed_out_peers = Vec::new();

        for peer in &peers {
            let Some(peer) = PeerHandle::checkout(peer) else { continue };

            peer.increment_timeout(dtime);
            if peer.is_timed_out(config.peer_timeout) {
                timed_out_peers.push(peer.id());
                continue;
            }

            let resend_timeout = peer.resend_timeout();
            let mut resent_any = false;
            for (channel_num, channel) in peer.channels() {
                channel.remove_unreliable_timed_out_splits(dtime, config.peer_timeout);

                let outgoing = channel.outgoing_reliables();
                outgoing.increment_timeouts(dtime);
                let timed_outs = outgoing.timed_outs(resend_timeout, quota);
                if !timed_outs.is_empty() {
                    resent_any = true;
                    let lost_bytes: usize = timed_outs.iter().map(|p| p.data.len()).sum();
                    channel.update_packet_loss_counter(timed_outs.len() as u32);
                    channel.update_bytes_lost(lost_bytes);
                    for packet in timed_outs {
                        trace!(
                            "{}: resending seqnum {:?} to peer {} on channel {} after {:?}",
                            self.shared.describe(),
                            packet.seqnum(),
                            peer.id(),
                            channel_num,
                            packet.totaltime
                        );
                        self.shared.raw_send(&packet.address, packet.data.to_vec());
                    }
                }

                channel.update_timers(dtime);
                self.send_queued_reliables(&peer, channel_num, channel);
            }

            if resent_any {
                peer.back_off_resend_timeout();
            }

            if peer.ping_due(dtime, config.ping_interval) {
                self.outgoing.push_back(OutgoingPacket::new(peer.id(), 0, PacketEncoder::make_ping(), true));
            }
        }

        for peer_id in timed_out_peers {
            debug!("{}: peer {} timed out", self.shared.describe(), peer_id);
            self.shared.delete_peer(peer_id, true);
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn process_command(&mut self, command: ConnectionCommand) {
        trace!("{}: processing {}", self.shared.describe(), command_name(&command));
        match command {
            ConnectionCommand::Serve { address } => self.serve(address),
            ConnectionCommand::Connect { address } => self.connect(address),
            ConnectionCommand::Disconnect => self.disconnect(),
            ConnectionCommand::DisconnectPeer { peer_id } => self.disconnect_peer(peer_id),
            ConnectionCommand::Send { peer_id, channel, data, reliable } => {
                self.send(peer_id, channel, &data, reliable)
            }
            ConnectionCommand::SendToAll { channel, data, reliable } => {
                for peer_id in self.shared.peers.ids() {
                    self.send(peer_id, channel, &data, reliable);
                }
            }
            ConnectionCommand::DeletePeer { peer_id } => {
                self.shared.delete_peer(peer_id, false);
            }
            ConnectionCommand::Ack { peer_id, channel, seqnum } => {
                self.outgoing.push_back(OutgoingPacket::ack(peer_id, channel, PacketEncoder::make_ack(seqnum)));
            }
            ConnectionCommand::CreatePeer { peer_id } => {
                let frame = PacketEncoder::make_set_peer_id(peer_id);
                self.outgoing.push_back(OutgoingPacket::new(peer_id, 0, frame, true));
            }
            ConnectionCommand::EnableBigSendWindow { peer_id } => {
                let frame = PacketEncoder::make_enable_big_send_window();
                self.outgoing.push_back(OutgoingPacket::new(peer_id, 0, frame, true));
            }
        }
    }

    fn serve(&mut self, address: SocketAddr) {
        match self.shared.transport.bind(address, &self.shared.config) {
            Ok(bound) => {
                self.shared.set_local_peer_id(PEER_ID_SERVER);
                debug!("{}: serving on {}", self.shared.describe(), bound);
            }
            Err(err) => {
                error!("{}: failed to serve on {}: {}", self.shared.describe(), address, err);
                self.shared.push_event(ConnectionEvent::BindFailed);
            }
        }
    }

    fn connect(&mut self, address: SocketAddr) {
        if !self.shared.transport.is_bound() {
            let any = wildcard_for(address);
            if let Err(err) = self.shared.transport.bind(any, &self.shared.config) {
                error!("{}: failed to bind for connecting to {}: {}", self.shared.describe(), address, err);
                self.shared.push_event(ConnectionEvent::BindFailed);
                return;
            }
        }

        let server = Arc::new(Peer::new_local(PEER_ID_SERVER, address, self.shared.config.initial_window_size));
        if self.shared.peers.insert(server).is_err() {
            warn!("{}: already connected, ignoring connect to {}", self.shared.describe(), address);
            return;
        }
        self.shared.set_local_peer_id(PEER_ID_INEXISTENT);
        self.shared.push_event(ConnectionEvent::PeerAdded { peer_id: PEER_ID_SERVER, address });
        debug!("{}: connecting to {}", self.shared.describe(), address);

        // An empty reliable ORIGINAL makes the server create our peer.
        self.outgoing.push_back(OutgoingPacket::new(
            PEER_ID_SERVER,
            0,
            PacketEncoder::make_original(&[]),
            true,
        ));
    }

    fn disconnect(&mut self) {
        for peer_id in self.shared.peers.ids() {
            self.disconnect_peer(peer_id);
        }
    }

    fn disconnect_peer(&mut self, peer_id: u16) {
        if let Some(peer) = self.shared.peers.checkout(peer_id) {
            let datagram = PacketEncoder::make_packet(
                self.shared.config.protocol_id,
                self.shared.local_peer_id(),
                0,
                &PacketEncoder::make_disco(),
            );
            self.shared.raw_send(&peer.address(), datagram);
        }
        self.shared.delete_peer(peer_id, false);
    }

    fn send(&mut self, peer_id: u16, channel_num: u8, data: &[u8], reliable: bool) {
        let Some(peer) = self.shared.peers.checkout(peer_id) else {
            trace!("{}: dropping send to unknown peer {}", self.shared.describe(), peer_id);
            return;
        };
        let channel = match peer.channel(channel_num) {
            Ok(channel) => channel,
            Err(err) => {
                warn!("{}: dropping send to peer {}: {}", self.shared.describe(), peer_id, err);
                return;
            }
        };

        let mut split_seqnum = channel.next_split_seqnum();
        let frames = match PacketEncoder::make_auto_split(data, self.shared.config.fragment_size, &mut split_seqnum) {
            Ok(frames) => frames,
            Err(err) => {
                warn!("{}: dropping send to peer {}: {}", self.shared.describe(), peer_id, err);
                return;
            }
        };
        channel.set_next_split_seqnum(split_seqnum);

        for frame in frames {
            self.outgoing.push_back(OutgoingPacket::new(peer_id, channel_num, frame, reliable));
        }
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    fn send_packets(&mut self) {
        if self.outgoing.is_empty() {
            return;
        }
        let quota = packet_quota(self.shared.config.max_packets_per_iteration, self.shared.peers.len());
        let mut sent_per_peer: HashMap<u16, usize> = HashMap::new();
        let mut postponed = VecDeque::new();

        while let Some(packet) = self.outgoing.pop_front() {
            if packet.ack {
                self.send_as_packet(packet);
                continue;
            }
            let sent = sent_per_peer.entry(packet.peer_id).or_default();
            if *sent >= quota {
                postponed.push_back(packet);
                continue;
            }
            *sent += 1;
            self.send_as_packet(packet);
        }

        if postponed.len() > self.shared.config.max_packets_requeued {
            debug!(
                "{}: {} packets postponed, more than the {} requeue ceiling",
                self.shared.describe(),
                postponed.len(),
                self.shared.config.max_packets_requeued
            );
        }
        self.outgoing = postponed;
    }

    fn send_as_packet(&mut self, packet: OutgoingPacket) {
        let Some(peer) = self.shared.peers.checkout(packet.peer_id) else {
            trace!("{}: dropping packet for unknown peer {}", self.shared.describe(), packet.peer_id);
            return;
        };
        let channel = match peer.channel(packet.channel) {
            Ok(channel) => channel,
            Err(err) => {
                warn!("{}: dropping packet: {}", self.shared.describe(), err);
                return;
            }
        };

        if !packet.reliable {
            let datagram = PacketEncoder::make_packet(
                self.shared.config.protocol_id,
                self.shared.local_peer_id(),
                packet.channel,
                &packet.frame,
            );
            channel.update_bytes_sent(datagram.len(), 1);
            self.shared.raw_send(&peer.address(), datagram);
            return;
        }

        // Reliables waiting for window space go first.
        if channel.queued_reliables() > 0 {
            self.park_reliable(&peer, channel, packet.frame);
            return;
        }
        match channel.get_outgoing_sequence_number() {
            Some(seqnum) => self.send_reliable(&peer, packet.channel, channel, packet.frame, seqnum),
            None => self.park_reliable(&peer, channel, packet.frame),
        }
    }

    fn park_reliable(&self, peer: &Peer, channel: &Channel, frame: Vec<u8>) {
        if channel.queue_reliable(frame) {
            warn!(
                "{}: {} reliables waiting for window space to peer {}",
                self.shared.describe(),
                channel.queued_reliables(),
                peer.id()
            );
        }
    }

    fn send_queued_reliables(&self, peer: &Peer, channel_num: u8, channel: &Channel) {
        while let Some(frame) = channel.dequeue_reliable() {
            match channel.get_outgoing_sequence_number() {
                Some(seqnum) => self.send_reliable(peer, channel_num, channel, frame, seqnum),
                None => {
                    channel.requeue_reliable_front(frame);
                    break;
                }
            }
        }
    }

    fn send_reliable(&self, peer: &Peer, channel_num: u8, channel: &Channel, frame: Vec<u8>, seqnum: u16) {
        let reliable = PacketEncoder::make_reliable(&frame, seqnum);
        let datagram = PacketEncoder::make_packet(
            self.shared.config.protocol_id,
            self.shared.local_peer_id(),
            channel_num,
            &reliable,
        );

        if let Err(err) = register(channel, &datagram, peer.address()) {
            warn!(
                "{}: could not buffer reliable {} for peer {}: {}",
                self.shared.describe(),
                seqnum,
                peer.id(),
                err
            );
            channel.put_back_sequence_number(seqnum);
            return;
        }
        channel.update_bytes_sent(datagram.len(), 1);
        self.shared.raw_send(&peer.address(), datagram);
    }
}

fn register(channel: &Channel, datagram: &[u8], address: SocketAddr) -> Result<()> {
    match channel.register_outgoing(BufferedPacket::new(datagram.to_vec(), address)) {
        Err(ErrorKind::AlreadyExists) => Ok(()),
        other => other,
    }
}

/// Datagrams each peer may send per iteration.
fn packet_quota(max_packets_per_iteration: usize, peer_count: usize) -> usize {
    (max_packets_per_iteration / peer_count.max(1)).max(1)
}

/// The unspecified address of `target`'s family, any port.
fn wildcard_for(target: SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}

fn command_name(command: &ConnectionCommand) -> &'static str {
    match command {
        ConnectionCommand::Serve { .. } => "serve",
        ConnectionCommand::Connect { .. } => "connect",
        ConnectionCommand::Disconnect => "disconnect",
        ConnectionCommand::DisconnectPeer { .. } => "disconnect_peer",
        ConnectionCommand::Send { .. } => "send",
        ConnectionCommand::SendToAll { .. } => "send_to_all",
        ConnectionCommand::DeletePeer { .. } => "delete_peer",
        ConnectionCommand::Ack { .. } => "ack",
        ConnectionCommand::CreatePeer { .. } => "create_peer",
        ConnectionCommand::EnableBigSendWindow { .. } => "enable_big_send_window",
    }
}
