//! End-to-end tests over real loopback sockets.

use std::{
    collections::BTreeSet,
    net::SocketAddr,
    sync::Arc,
    thread::sleep,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use relink_core::{
    config::Config,
    constants::MIN_RELIABLE_WINDOW_SIZE,
    error::ErrorKind,
    interceptor::Interceptor,
};
use relink_host::{Connection, ConnectionEvent, PeerHandler};
use relink_protocol::{Frame, PacketDecoder};

const WAIT: Duration = Duration::from_secs(10);

fn wait_for(
    connection: &Connection,
    timeout: Duration,
    mut matches: impl FnMut(&ConnectionEvent) -> bool,
) -> Option<ConnectionEvent> {
    let deadline = Instant::now() + timeout;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match connection.wait_event(remaining) {
            Some(event) if matches(&event) => return Some(event),
            Some(_) => continue,
            None => break,
        }
    }
    None
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5));
    }
    condition()
}

/// Starts a server on an ephemeral port and returns it with its loopback address.
fn start_server(connection: Connection) -> (Connection, SocketAddr) {
    connection.serve(0);
    assert!(wait_until(WAIT, || connection.local_addr().is_ok()), "server never bound");
    let port = connection.local_addr().unwrap().port();
    (connection, SocketAddr::from(([127, 0, 0, 1], port)))
}

fn connect_client(client: &Connection, server: &Connection, address: SocketAddr) -> u16 {
    client.connect(address);
    let added = wait_for(server, WAIT, |e| matches!(e, ConnectionEvent::PeerAdded { .. }));
    let Some(ConnectionEvent::PeerAdded { peer_id, .. }) = added else {
        panic!("server never saw the client");
    };
    assert!(wait_until(WAIT, || client.is_connected()), "client never got its id");
    peer_id
}

/// Drops outgoing datagrams at random.
struct Lossy {
    rng: StdRng,
    drop_probability: f64,
}

impl Interceptor for Lossy {
    fn on_receive(&mut self, _addr: &SocketAddr, _data: &mut [u8]) -> bool {
        true
    }

    fn on_send(&mut self, _addr: &SocketAddr, _data: &mut Vec<u8>) -> bool {
        !self.rng.random_bool(self.drop_probability)
    }
}

/// Decodes the frame of an outgoing datagram, looking through a RELIABLE wrapper.
/// Returns the reliable seqnum, if any, with the inner frame.
fn outgoing_frame(datagram: &[u8]) -> Option<(Option<u16>, Frame<'_>)> {
    match PacketDecoder::decode_frame(PacketDecoder::frame_bytes(datagram)).ok()? {
        Frame::Reliable { seqnum, inner } => Some((Some(seqnum), PacketDecoder::decode_frame(inner).ok()?)),
        frame => Some((None, frame)),
    }
}

/// A SPLIT chunk seen on the wire: reliable seqnum, chunk count and chunk number.
type SplitChunk = (Option<u16>, u16, u16);

/// Records every SPLIT chunk sent.
#[derive(Default)]
struct SplitRecorder {
    chunks: Arc<Mutex<Vec<SplitChunk>>>,
}

impl Interceptor for SplitRecorder {
    fn on_receive(&mut self, _addr: &SocketAddr, _data: &mut [u8]) -> bool {
        true
    }

    fn on_send(&mut self, _addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
        if let Some((seqnum, Frame::Split { chunk_count, chunk_num, .. })) = outgoing_frame(data) {
            self.chunks.lock().push((seqnum, chunk_count, chunk_num));
        }
        true
    }
}

/// Drops one chunk of every unreliable split payload.
struct DropUnreliableChunk {
    chunk_num: u16,
}

impl Interceptor for DropUnreliableChunk {
    fn on_receive(&mut self, _addr: &SocketAddr, _data: &mut [u8]) -> bool {
        true
    }

    fn on_send(&mut self, _addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
        !matches!(
            outgoing_frame(data),
            Some((None, Frame::Split { chunk_num, .. })) if chunk_num == self.chunk_num
        )
    }
}

/// Short peer timeout with keepalives well inside it.
fn keepalive_config() -> Config {
    Config {
        peer_timeout: Duration::from_millis(600),
        ping_interval: Duration::from_millis(100),
        ..Config::default()
    }
}

#[test]
fn test_handshake_assigns_first_remote_id() {
    let (server, address) = start_server(Connection::new(Config::default()).unwrap());
    let client = Connection::new(Config::default()).unwrap();

    let peer_id = connect_client(&client, &server, address);
    assert_eq!(peer_id, 2);
    assert_eq!(client.local_peer_id(), 2);
    assert_eq!(server.local_peer_id(), 1);
    assert_eq!(server.peer_ids(), vec![2]);
    assert_eq!(client.peer_ids(), vec![1]);
    assert_eq!(client.peer_address(1).unwrap(), address);
    assert!(!server.is_connected());
}

#[test]
fn test_large_reliable_payload_arrives_whole() {
    let config = Config::with_fragment_size(512);
    assert_eq!(config.max_packet_size, 529);
    let (server, address) = start_server(Connection::new(config.clone()).unwrap());
    let recorder = SplitRecorder::default();
    let chunks = Arc::clone(&recorder.chunks);
    let client = Connection::with_interceptor(config, Box::new(recorder)).unwrap();
    let peer_id = connect_client(&client, &server, address);

    let payload: Vec<u8> = (0..40000).map(|i| (i % 251) as u8).collect();
    client.send(1, 0, &payload, true).unwrap();

    let received = wait_for(&server, WAIT, |e| matches!(e, ConnectionEvent::DataReceived { .. }));
    let Some(ConnectionEvent::DataReceived { peer_id: from, data }) = received else {
        panic!("payload never arrived");
    };
    assert_eq!(from, peer_id);
    assert_eq!(data.len(), payload.len());
    assert!(data == payload, "payload reassembled out of order");

    // Exactly one event for the whole payload.
    assert!(wait_for(&server, Duration::from_millis(300), |e| {
        matches!(e, ConnectionEvent::DataReceived { .. })
    })
    .is_none());

    // 79 distinct reliable SPLIT frames went out. Resends repeat a seqnum.
    let chunks = chunks.lock().clone();
    assert!(chunks.iter().all(|&(seqnum, count, _)| seqnum.is_some() && count == 79));
    let seqnums: BTreeSet<_> = chunks.iter().map(|&(seqnum, _, _)| seqnum).collect();
    let chunk_nums: BTreeSet<_> = chunks.iter().map(|&(_, _, chunk_num)| chunk_num).collect();
    assert_eq!(seqnums.len(), 79);
    assert_eq!(chunk_nums, (0..79).collect::<BTreeSet<u16>>());

    assert!(client.channel_stats(1, 0).unwrap().packets_sent >= 79);
    assert!(wait_until(WAIT, || client.peer_avg_rtt(1).unwrap().is_some()));
}

#[test]
fn test_reliable_in_order_under_loss() {
    let lossy = |seed| Box::new(Lossy { rng: StdRng::seed_from_u64(seed), drop_probability: 0.2 });
    let (server, address) =
        start_server(Connection::with_interceptor(Config::default(), lossy(1)).unwrap());
    let client = Connection::with_interceptor(Config::default(), lossy(2)).unwrap();
    let peer_id = connect_client(&client, &server, address);

    const COUNT: u32 = 100;
    for i in 0..COUNT {
        client.send(1, 1, &i.to_be_bytes(), true).unwrap();
    }

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(30);
    while received.len() < COUNT as usize && Instant::now() < deadline {
        if let Some(ConnectionEvent::DataReceived { peer_id: from, data }) =
            server.wait_event(Duration::from_millis(100))
        {
            assert_eq!(from, peer_id);
            received.push(u32::from_be_bytes(data.try_into().unwrap()));
        }
    }
    assert_eq!(received, (0..COUNT).collect::<Vec<_>>());

    // Resends whose ACK got lost are acknowledged again but not delivered twice.
    assert!(wait_for(&server, Duration::from_secs(1), |e| {
        matches!(e, ConnectionEvent::DataReceived { .. })
    })
    .is_none());
    assert_eq!(server.channel_stats(peer_id, 1).unwrap().incoming_reliables, 0);
}

#[test]
fn test_client_lifts_legacy_window() {
    let (server, address) = start_server(Connection::new(Config::default()).unwrap());
    let client = Connection::new(Config::default()).unwrap();
    let peer_id = connect_client(&client, &server, address);

    assert!(wait_until(WAIT, || !server.peer_is_legacy(peer_id).unwrap()));
    for channel in 0..3 {
        let window = server.channel_stats(peer_id, channel).unwrap().window_size;
        assert!(window > MIN_RELIABLE_WINDOW_SIZE, "channel {} window {}", channel, window);
    }
    assert!(!client.peer_is_legacy(1).unwrap());
    assert!(client.channel_stats(1, 0).unwrap().window_size > MIN_RELIABLE_WINDOW_SIZE);
}

#[test]
fn test_legacy_window_kept_without_request() {
    let (server, address) = start_server(Connection::new(Config::default()).unwrap());
    let config = Config { request_big_send_window: false, ..Config::default() };
    let client = Connection::new(config).unwrap();
    let peer_id = connect_client(&client, &server, address);

    // Anything the client would have sent first has arrived by the time this does.
    client.send(1, 0, b"marker", true).unwrap();
    assert!(wait_for(&server, WAIT, |e| matches!(e, ConnectionEvent::DataReceived { .. })).is_some());

    assert!(server.peer_is_legacy(peer_id).unwrap());
    assert_eq!(server.channel_stats(peer_id, 0).unwrap().window_size, MIN_RELIABLE_WINDOW_SIZE);
}

#[test]
fn test_keepalive_holds_idle_peer() {
    let (server, address) = start_server(Connection::new(keepalive_config()).unwrap());
    let client = Connection::new(keepalive_config()).unwrap();
    let peer_id = connect_client(&client, &server, address);

    // Idle for more than three peer timeouts.
    assert!(wait_for(&server, Duration::from_secs(2), |e| {
        matches!(e, ConnectionEvent::PeerRemoved { .. })
    })
    .is_none());
    assert!(std::iter::from_fn(|| client.get_event())
        .all(|e| !matches!(e, ConnectionEvent::PeerRemoved { .. })));

    assert_eq!(server.peer_ids(), vec![peer_id]);
    assert!(client.is_connected());
    assert!(server.channel_stats(peer_id, 0).unwrap().packets_sent > 0);
}

#[test]
fn test_incomplete_unreliable_split_is_evicted() {
    let config = Config { fragment_size: 512, max_packet_size: 529, ..keepalive_config() };
    let (server, address) = start_server(Connection::new(config.clone()).unwrap());
    let client =
        Connection::with_interceptor(config, Box::new(DropUnreliableChunk { chunk_num: 1 })).unwrap();
    let peer_id = connect_client(&client, &server, address);

    let payload: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
    client.send(1, 2, &payload, false).unwrap();

    let pending = || server.channel_stats(peer_id, 2).unwrap().incomplete_splits;
    assert!(wait_until(WAIT, || pending() == 1), "split reassembly never started");
    assert!(wait_until(WAIT, || pending() == 0), "incomplete split was never evicted");
    assert!(get_data(&server).is_none());
    assert_eq!(server.peer_ids(), vec![peer_id]);

    // Reliable splits are not touched by the interceptor.
    client.send(1, 2, &payload, true).unwrap();
    let received = wait_for(&server, WAIT, |e| matches!(e, ConnectionEvent::DataReceived { .. }));
    let Some(ConnectionEvent::DataReceived { data, .. }) = received else {
        panic!("reliable split never arrived");
    };
    assert!(data == payload);
}

fn get_data(connection: &Connection) -> Option<Vec<u8>> {
    std::iter::from_fn(|| connection.get_event()).find_map(|e| match e {
        ConnectionEvent::DataReceived { data, .. } => Some(data),
        _ => None,
    })
}

#[test]
fn test_silent_peer_times_out_once() {
    let config = Config { peer_timeout: Duration::from_millis(500), ..Config::default() };
    let (server, address) = start_server(Connection::new(config).unwrap());
    let client = Connection::new(Config::default()).unwrap();
    let peer_id = connect_client(&client, &server, address);

    // Dropping the client sends nothing.
    drop(client);

    let removed = wait_for(&server, WAIT, |e| matches!(e, ConnectionEvent::PeerRemoved { .. }));
    let Some(ConnectionEvent::PeerRemoved { peer_id: gone, timeout, .. }) = removed else {
        panic!("silent client was never removed");
    };
    assert_eq!(gone, peer_id);
    assert!(timeout);

    assert!(wait_for(&server, Duration::from_secs(1), |e| {
        matches!(e, ConnectionEvent::PeerRemoved { .. })
    })
    .is_none());
    assert!(matches!(server.send(peer_id, 0, b"late", true), Err(ErrorKind::PeerNotFound(_))));
}

#[test]
fn test_disconnect_notifies_server() {
    let (server, address) = start_server(Connection::new(Config::default()).unwrap());
    let client = Connection::new(Config::default()).unwrap();
    let peer_id = connect_client(&client, &server, address);

    client.disconnect();

    let removed = wait_for(&server, WAIT, |e| matches!(e, ConnectionEvent::PeerRemoved { .. }));
    let Some(ConnectionEvent::PeerRemoved { peer_id: gone, timeout, .. }) = removed else {
        panic!("server never dropped the client");
    };
    assert_eq!(gone, peer_id);
    assert!(!timeout);
    assert!(wait_until(WAIT, || client.peer_ids().is_empty()));
}

#[derive(Default)]
struct Recorder {
    added: Arc<Mutex<Vec<u16>>>,
}

impl PeerHandler for Recorder {
    fn peer_added(&mut self, peer_id: u16) {
        self.added.lock().push(peer_id);
    }

    fn deleting_peer(&mut self, _peer_id: u16, _timeout: bool) {}
}

#[test]
fn test_blocking_receive_reports_peers_to_handler() {
    let recorder = Recorder::default();
    let added = Arc::clone(&recorder.added);
    let (mut server, address) =
        start_server(Connection::with_peer_handler(Config::default(), Box::new(recorder)).unwrap());
    server.set_timeout(WAIT);

    let client = Connection::new(Config::default()).unwrap();
    client.connect(address);
    assert!(wait_until(WAIT, || client.is_connected()));
    client.send(1, 2, b"hello", false).unwrap();

    let (from, data) = server.receive().unwrap();
    assert_eq!(data, b"hello");
    assert_eq!(*added.lock(), vec![from]);

    server.set_timeout(Duration::from_millis(50));
    assert!(matches!(server.receive(), Err(ErrorKind::NoIncomingData)));
}

#[test]
fn test_bind_failure_surfaces() {
    let (first, address) = start_server(Connection::new(Config::default()).unwrap());
    let mut second = Connection::new(Config::default()).unwrap();
    second.set_timeout(WAIT);
    second.serve(address.port());

    assert!(matches!(second.receive(), Err(ErrorKind::ConnectionLost)));
    drop(first);
}
