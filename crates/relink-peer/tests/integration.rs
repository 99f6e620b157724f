//! Integration tests for the relink-peer crate.
//!
//! These drive two peers' channels against each other without sockets: the "network"
//! is a vector of datagrams that gets shuffled and thinned out.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use rand::{seq::SliceRandom, Rng};
use relink_core::{
    constants::{MIN_RELIABLE_WINDOW_SIZE, START_RELIABLE_WINDOW_SIZE},
    error::ErrorKind,
};
use relink_peer::{Peer, PeerHandle, PeerState};
use relink_protocol::{seqnum::seqnum_higher, BufferedPacket, Frame, PacketDecoder, PacketEncoder};

const PROTOCOL_ID: u32 = 0x4f45_7403;

fn get_fake_addr() -> SocketAddr {
    "127.0.0.1:30000".parse().unwrap()
}

/// Frames, numbers and registers reliable payloads until the window is full.
fn send_reliables(sender: &Peer, channel: u8, payloads: &mut Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    let channel_state = sender.channel(channel).unwrap();
    let mut datagrams = Vec::new();
    while !payloads.is_empty() {
        let Some(seqnum) = channel_state.get_outgoing_sequence_number() else { break };
        let payload = payloads.remove(0);
        let frame = PacketEncoder::make_reliable(&PacketEncoder::make_original(&payload), seqnum);
        let datagram = PacketEncoder::make_packet(PROTOCOL_ID, 2, channel, &frame);
        channel_state
            .register_outgoing(BufferedPacket::new(datagram.clone(), get_fake_addr()))
            .unwrap();
        datagrams.push(datagram);
    }
    datagrams
}

/// Receive-side handling of one reliable datagram. Collects payloads delivered in
/// order and returns the seqnum to acknowledge. The connection's receive thread is
/// exercised end to end by the relink-host loopback tests.
fn receive(receiver: &Peer, datagram: &[u8], delivered: &mut Vec<Vec<u8>>) -> u16 {
    let header = PacketDecoder::read_base_header(datagram).unwrap();
    let channel = receiver.channel(header.channel).unwrap();
    let Frame::Reliable { seqnum, inner } =
        PacketDecoder::decode_frame(PacketDecoder::frame_bytes(datagram)).unwrap()
    else {
        panic!("expected a reliable frame");
    };

    let next = channel.next_incoming_seqnum();
    if seqnum_higher(next, seqnum) {
        // Already delivered; only the ACK went missing.
        channel.update_packet_too_late_counter();
    } else if seqnum == next {
        deliver(inner, delivered);
        channel.inc_next_incoming_seqnum();
        while channel.incoming_reliables().first_seqnum() == Some(channel.next_incoming_seqnum()) {
            let packet = channel.incoming_reliables().pop_first().unwrap();
            deliver(&packet.inner().unwrap(), delivered);
            channel.inc_next_incoming_seqnum();
        }
    } else {
        let buffered = channel.buffer_incoming(BufferedPacket::new(datagram.to_vec(), get_fake_addr()));
        assert!(matches!(buffered, Ok(()) | Err(ErrorKind::AlreadyExists)), "{:?}", buffered);
    }
    seqnum
}

fn deliver(inner: &[u8], delivered: &mut Vec<Vec<u8>>) {
    match PacketDecoder::decode_frame(inner).unwrap() {
        Frame::Original(data) => delivered.push(data.to_vec()),
        other => panic!("unexpected inner frame {:?}", other),
    }
}

#[test]
fn test_reordered_reliables_are_delivered_in_order() {
    let sender = Peer::new_local(1, get_fake_addr(), START_RELIABLE_WINDOW_SIZE);
    let receiver = Peer::new_remote(2, get_fake_addr());

    let expected: Vec<Vec<u8>> = (0..100u8).map(|i| vec![i; 10]).collect();
    let mut payloads = expected.clone();
    let mut network = send_reliables(&sender, 1, &mut payloads);
    assert!(payloads.is_empty());
    network.shuffle(&mut rand::rng());

    let mut delivered = Vec::new();
    for datagram in &network {
        let acked = receive(&receiver, datagram, &mut delivered);
        sender.channel(1).unwrap().outgoing_reliables().pop_seqnum(acked).unwrap();
    }

    assert_eq!(delivered, expected);
    assert!(sender.channel(1).unwrap().outgoing_reliables().is_empty());
    assert!(receiver.channel(1).unwrap().incoming_reliables().is_empty());
}

#[test]
fn test_lossy_exchange_with_resends_delivers_exactly_once() {
    let sender = Peer::new_remote(2, get_fake_addr());
    let receiver = Peer::new_local(1, get_fake_addr(), START_RELIABLE_WINDOW_SIZE);
    assert_eq!(sender.channel(0).unwrap().window_size(), MIN_RELIABLE_WINDOW_SIZE);

    let expected: Vec<Vec<u8>> = (0..300u16).map(|i| i.to_be_bytes().to_vec()).collect();
    let mut payloads = expected.clone();
    let mut delivered = Vec::new();
    let mut rng = rand::rng();
    let channel = sender.channel(0).unwrap();
    let resend_timeout = Duration::from_millis(100);

    for _round in 0..1000 {
        let mut network = send_reliables(&sender, 0, &mut payloads);
        channel.outgoing_reliables().increment_timeouts(resend_timeout);
        let resends = channel.outgoing_reliables().timed_outs(resend_timeout, 1000);
        network.extend(resends.into_iter().map(|p| p.data.to_vec()));
        network.shuffle(&mut rng);

        for datagram in network {
            if rng.random_bool(0.3) {
                continue;
            }
            let acked = receive(&receiver, &datagram, &mut delivered);
            if rng.random_bool(0.3) {
                continue;
            }
            // A resend and its original can both be acknowledged.
            let popped = channel.outgoing_reliables().pop_seqnum(acked);
            assert!(matches!(popped, Ok(_) | Err(ErrorKind::NotFound)), "{:?}", popped);
        }

        if payloads.is_empty() && channel.outgoing_reliables().is_empty() {
            break;
        }
    }

    assert_eq!(delivered, expected);
    assert!(receiver.channel(0).unwrap().incoming_reliables().is_empty());
}

#[test]
fn test_handles_outlive_deletion() {
    let peer = Arc::new(Peer::new_remote(5, get_fake_addr()));
    let handle = PeerHandle::checkout(&peer).unwrap();
    assert!(peer.activate());

    assert!(peer.mark_pending_deletion());
    assert_eq!(handle.state(), PeerState::PendingDeletion);
    assert!(PeerHandle::checkout(&peer).is_none());
    assert_eq!(peer.usage_count(), 1);

    drop(handle);
    assert_eq!(peer.usage_count(), 0);
    assert_eq!(Arc::strong_count(&peer), 1);
}
