//! Wrap-aware comparison over the 16-bit sequence space.
//!
//! Sequence numbers are never compared with `<`/`>` directly; everything goes through
//! [`seqnum_higher`] and [`seqnum_in_window`].

use crate::packet::SequenceNumber;

const HALF_RANGE: u16 = 0x7fff;

/// Returns true if `a` is ahead of `b` in circular order.
///
/// A forward distance of up to half the range counts as ahead; anything further is
/// taken to have wrapped and is behind. Irreflexive and antisymmetric.
pub fn seqnum_higher(a: SequenceNumber, b: SequenceNumber) -> bool {
    if a > b {
        a - b <= HALF_RANGE
    } else if a < b {
        b - a > HALF_RANGE
    } else {
        false
    }
}

/// Returns true if `seq` lies in the circular half-open interval
/// `[start, start + window_size)`.
///
/// Holds for exactly `min(window_size, 65536)` values of `seq`.
pub fn seqnum_in_window(seq: SequenceNumber, start: SequenceNumber, window_size: u32) -> bool {
    u32::from(seq.wrapping_sub(start)) < window_size
}

/// Forward distance from `from` to `to`, wrapping.
#[cfg(test)]
pub(crate) fn seqnum_distance(from: SequenceNumber, to: SequenceNumber) -> u16 {
    to.wrapping_sub(from)
}
