use std::{default::Default, time::Duration};

use crate::{
    constants::{
        BASE_HEADER_SIZE, DEFAULT_MAX_PACKET_SIZE, DEFAULT_PROTOCOL_ID, MAX_RELIABLE_WINDOW_SIZE,
        MIN_RELIABLE_WINDOW_SIZE, PING_TIMEOUT, RELIABLE_HEADER_SIZE, SPLIT_HEADER_SIZE,
        START_RELIABLE_WINDOW_SIZE,
    },
    error::{ErrorKind, Result},
};

#[derive(Clone, Debug)]
/// Configuration options to tune protocol and thread behavior.
pub struct Config {
    /// Protocol id written into, and required on, every datagram.
    pub protocol_id: u32,
    /// Max size of a single datagram in bytes, headers included.
    pub max_packet_size: usize,
    /// Max payload bytes carried by one SPLIT chunk.
    pub fragment_size: usize,
    /// Idle time after which a silent peer is removed.
    pub peer_timeout: Duration,
    /// Bind the socket to the IPv6 wildcard instead of IPv4.
    pub ipv6: bool,
    /// How long the receive thread blocks on the socket before doing housekeeping.
    pub receive_timeout: Duration,
    /// Max time the send thread idles when there is no work.
    pub send_thread_sleep: Duration,
    /// Interval between keepalive pings sent to every peer.
    pub ping_interval: Duration,
    /// Reliable window a negotiated (non-legacy) peer starts with.
    pub initial_window_size: u16,
    /// Client asks the server to lift the legacy window after receiving its peer id.
    pub request_big_send_window: bool,
    /// Commands taken from the command queue per send loop iteration.
    pub max_commands_per_iteration: usize,
    /// Datagrams sent per send loop iteration, shared among peers.
    pub max_packets_per_iteration: usize,
    /// Outgoing packets kept for the next iteration when the quota is exhausted.
    pub max_packets_requeued: usize,
    /// Size of the buffer used to read datagrams from the socket.
    pub receive_buffer_size: usize,
    /// Socket receive buffer size in bytes (None = use system default).
    /// Corresponds to SO_RCVBUF socket option.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = use system default).
    /// Corresponds to SO_SNDBUF socket option.
    pub socket_send_buffer_size: Option<usize>,
    /// Time-to-live for outgoing packets (None = use system default).
    pub socket_ttl: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol_id: DEFAULT_PROTOCOL_ID,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            fragment_size: DEFAULT_MAX_PACKET_SIZE
                - BASE_HEADER_SIZE
                - RELIABLE_HEADER_SIZE
                - SPLIT_HEADER_SIZE,
            peer_timeout: Duration::from_secs(30),
            ipv6: false,
            receive_timeout: Duration::from_millis(50),
            send_thread_sleep: Duration::from_millis(50),
            ping_interval: Duration::from_secs_f32(PING_TIMEOUT),
            initial_window_size: START_RELIABLE_WINDOW_SIZE,
            request_big_send_window: true,
            max_commands_per_iteration: 1,
            max_packets_per_iteration: 1024,
            max_packets_requeued: 256,
            receive_buffer_size: 0x10000,
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
            socket_ttl: None,
        }
    }
}

impl Config {
    /// Returns a config whose `max_packet_size` fits chunks of `fragment_size` bytes.
    pub fn with_fragment_size(fragment_size: usize) -> Self {
        Self {
            fragment_size,
            max_packet_size: fragment_size
                + BASE_HEADER_SIZE
                + RELIABLE_HEADER_SIZE
                + SPLIT_HEADER_SIZE,
            ..Self::default()
        }
    }

    /// Checks that the options are consistent with each other.
    pub fn validate(&self) -> Result<()> {
        if self.fragment_size == 0 {
            return Err(ErrorKind::InvalidConfig("fragment_size must be non-zero"));
        }
        let framed = self.fragment_size + BASE_HEADER_SIZE + RELIABLE_HEADER_SIZE + SPLIT_HEADER_SIZE;
        if framed > self.max_packet_size {
            return Err(ErrorKind::InvalidConfig(
                "fragment_size plus headers exceeds max_packet_size",
            ));
        }
        if self.max_packet_size > self.receive_buffer_size {
            return Err(ErrorKind::InvalidConfig("max_packet_size exceeds receive_buffer_size"));
        }
        if self.peer_timeout.is_zero() || self.receive_timeout.is_zero() {
            return Err(ErrorKind::InvalidConfig("timeouts must be positive"));
        }
        if self.max_commands_per_iteration == 0 || self.max_packets_per_iteration == 0 {
            return Err(ErrorKind::InvalidConfig("per-iteration limits must be non-zero"));
        }
        if !(MIN_RELIABLE_WINDOW_SIZE..=MAX_RELIABLE_WINDOW_SIZE).contains(&self.initial_window_size) {
            return Err(ErrorKind::InvalidConfig("initial_window_size out of range"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fragment_size, 495);
    }

    #[test]
    fn test_with_fragment_size() {
        let config = Config::with_fragment_size(512);
        assert_eq!(config.max_packet_size, 529);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fragment_size_too_large() {
        let mut config = Config::default();
        config.fragment_size = config.max_packet_size;
        assert!(matches!(config.validate(), Err(ErrorKind::InvalidConfig(_))));
    }

    #[test]
    fn test_window_out_of_range() {
        let mut config = Config::default();
        config.initial_window_size = 1;
        assert!(config.validate().is_err());
    }
}
