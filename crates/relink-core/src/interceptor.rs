//! Datagram interception for custom processing.
//!
//! An [`Interceptor`] sees every raw datagram right after it is read from the socket
//! and right before it is written to it. It can rewrite the bytes or drop the
//! datagram altogether, which makes it the hook for traffic logging, obfuscation,
//! and the lossy-network simulations used by the integration tests.

use std::net::SocketAddr;

/// Hook invoked around every datagram a connection sends or receives.
///
/// The connection shares one interceptor between its send and receive threads,
/// so implementations must be `Send`.
///
/// # Examples
/// ```
/// use std::net::SocketAddr;
/// use relink_core::interceptor::Interceptor;
///
/// /// Drops every third outgoing datagram.
/// struct EveryThird(usize);
///
/// impl Interceptor for EveryThird {
///     fn on_receive(&mut self, _addr: &SocketAddr, _data: &mut [u8]) -> bool {
///         true
///     }
///
///     fn on_send(&mut self, _addr: &SocketAddr, _data: &mut Vec<u8>) -> bool {
///         self.0 += 1;
///         self.0 % 3 != 0
///     }
/// }
/// ```
pub trait Interceptor: Send {
    /// Called for a datagram received from `addr`, before it is decoded.
    ///
    /// Returns `false` to drop the datagram.
    fn on_receive(&mut self, addr: &SocketAddr, data: &mut [u8]) -> bool;

    /// Called for a fully framed datagram about to be sent to `addr`.
    ///
    /// Returns `false` to drop the datagram. A dropped reliable datagram stays in
    /// the retransmission buffer and is resent after its timeout.
    fn on_send(&mut self, addr: &SocketAddr, data: &mut Vec<u8>) -> bool;
}

/// Interceptor that passes all datagrams through unchanged.
///
/// This is the default interceptor when none is specified.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpInterceptor;

impl Interceptor for NoOpInterceptor {
    fn on_receive(&mut self, _addr: &SocketAddr, _data: &mut [u8]) -> bool {
        true
    }

    fn on_send(&mut self, _addr: &SocketAddr, _data: &mut Vec<u8>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 30000)
    }

    /// Drops outgoing datagrams whose channel byte matches.
    struct ChannelFilter(u8);

    impl Interceptor for ChannelFilter {
        fn on_receive(&mut self, _addr: &SocketAddr, _data: &mut [u8]) -> bool {
            true
        }

        fn on_send(&mut self, _addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
            data.get(6) != Some(&self.0)
        }
    }

    #[test]
    fn test_channel_filter_drops_matching_datagrams() {
        let mut filter = ChannelFilter(2);
        let mut on_two = vec![0, 0, 0, 0, 0, 1, 2, 1];
        let mut on_zero = vec![0, 0, 0, 0, 0, 1, 0, 1];
        assert!(!filter.on_send(&addr(), &mut on_two));
        assert!(filter.on_send(&addr(), &mut on_zero));
    }

    struct XorInterceptor;

    impl Interceptor for XorInterceptor {
        fn on_receive(&mut self, _addr: &SocketAddr, data: &mut [u8]) -> bool {
            data.iter_mut().for_each(|b| *b ^= 0x5a);
            true
        }

        fn on_send(&mut self, _addr: &SocketAddr, data: &mut Vec<u8>) -> bool {
            data.iter_mut().for_each(|b| *b ^= 0x5a);
            true
        }
    }

    #[test]
    fn test_rewriting_interceptor_round_trips() {
        let mut interceptor = XorInterceptor;
        let mut data = vec![0x4f, 0x45, 0x74, 0x03];
        let original = data.clone();

        assert!(interceptor.on_send(&addr(), &mut data));
        assert_ne!(data, original);
        assert!(interceptor.on_receive(&addr(), &mut data));
        assert_eq!(data, original);
    }

    #[test]
    fn test_noop_interceptor() {
        let mut interceptor = NoOpInterceptor;
        let mut data = vec![1, 2, 3];

        assert!(interceptor.on_receive(&addr(), &mut data));
        assert!(interceptor.on_send(&addr(), &mut data));
        assert_eq!(data, vec![1, 2, 3]);
    }
}
