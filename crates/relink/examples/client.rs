//! Client that sends messages to the echo server and prints the replies.
//!
//! Run the server first:
//! - cargo run -p relink --example server
//!
//! Then the client:
//! - cargo run -p relink --example client -- 127.0.0.1:30000
//! - cargo run -p relink --example client -- 127.0.0.1:30000 10 200
//!   (sends 10 messages, 200ms apart)

use std::{
    env,
    net::SocketAddr,
    thread,
    time::{Duration, Instant},
};

use relink::prelude::*;
use tracing::Level;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    // Args: <server_addr> [count] [interval_ms]
    let mut args = env::args().skip(1);
    let server_addr: SocketAddr =
        args.next().unwrap_or_else(|| "127.0.0.1:30000".to_string()).parse()?;
    let count: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(5);
    let interval = Duration::from_millis(args.next().and_then(|s| s.parse().ok()).unwrap_or(300));

    let client = Connection::new(Config::default())?;
    client.connect(server_addr);

    let started = Instant::now();
    while !client.is_connected() {
        if started.elapsed() > Duration::from_secs(5) {
            return Err(format!("no answer from {}", server_addr).into());
        }
        thread::sleep(Duration::from_millis(10));
    }
    println!("connected to {} as peer {}", server_addr, client.local_peer_id());

    for i in 0..count {
        client.send(1, 0, format!("hello {}", i).as_bytes(), true)?;

        let deadline = Instant::now() + interval;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match client.wait_event(remaining) {
                Some(ConnectionEvent::DataReceived { data, .. }) => {
                    println!("[reply] \"{}\"", String::from_utf8_lossy(&data));
                }
                Some(ConnectionEvent::PeerRemoved { timeout, .. }) => {
                    println!("[lost] server went away (timeout: {})", timeout);
                    return Ok(());
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    if let Ok(rtt) = client.peer_avg_rtt(1) {
        println!("average rtt: {:?}", rtt);
    }
    client.disconnect();
    thread::sleep(Duration::from_millis(100));
    Ok(())
}
