//! Echo server using relink.
//!
//! Run:
//! - cargo run -p relink --example server
//! - cargo run -p relink --example server -- 30000

use std::{env, time::Duration};

use relink::prelude::*;
use tracing::Level;

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let port: u16 = env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(30000);

    let server = Connection::new(Config::default())?;
    server.serve(port);
    println!("relink echo server on port {}", port);

    loop {
        let Some(event) = server.wait_event(Duration::from_millis(500)) else {
            continue;
        };
        match event {
            ConnectionEvent::PeerAdded { peer_id, address } => {
                println!("[join] peer {} from {}", peer_id, address);
            }
            ConnectionEvent::DataReceived { peer_id, data } => {
                println!("[data] peer {}: \"{}\"", peer_id, String::from_utf8_lossy(&data));
                if let Err(e) = server.send(peer_id, 0, &data, true) {
                    eprintln!("failed to queue echo: {}", e);
                }
            }
            ConnectionEvent::PeerRemoved { peer_id, timeout, address } => {
                println!("[leave] peer {} at {} (timeout: {})", peer_id, address, timeout);
            }
            ConnectionEvent::BindFailed => {
                eprintln!("could not bind port {}", port);
                return Err(ErrorKind::ConnectionLost);
            }
        }
    }
}
