use std::{ops::Deref, sync::Arc};

/// Reference-counted, sliceable datagram bytes.
///
/// Retransmission clones a buffered datagram on every timeout, and the receive path
/// peels headers off nested frames; both only move the `(start, len)` view and bump
/// the reference count instead of copying.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedBytes {
    data: Arc<[u8]>,
    start: usize,
    len: usize,
}

impl SharedBytes {
    /// Takes ownership of `vec`.
    pub fn from_vec(vec: Vec<u8>) -> Self {
        let data: Arc<[u8]> = Arc::from(vec.into_boxed_slice());
        let len = data.len();
        Self { data, start: 0, len }
    }

    /// Copies `bytes` into a new buffer.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }

    /// Returns a view of `len` bytes starting at `start`, or `None` when out of bounds.
    pub fn slice(&self, start: usize, len: usize) -> Option<Self> {
        let end = start.checked_add(len)?;
        if end > self.len {
            return None;
        }
        Some(Self { data: self.data.clone(), start: self.start + start, len })
    }

    /// Returns the view past the first `offset` bytes, or `None` when `offset` is
    /// beyond the end.
    pub fn tail(&self, offset: usize) -> Option<Self> {
        self.slice(offset, self.len.checked_sub(offset)?)
    }

    /// Returns the current view as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    /// Returns the length of the current view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the view into an owned vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl From<Vec<u8>> for SharedBytes {
    fn from(v: Vec<u8>) -> Self {
        Self::from_vec(v)
    }
}

impl Deref for SharedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_skips_header() {
        let bytes = SharedBytes::from_vec(vec![3, 0xff, 0xdc, 1, b'h', b'i']);
        let inner = bytes.tail(3).unwrap();
        assert_eq!(inner.as_slice(), &[1, b'h', b'i']);
        assert_eq!(inner.tail(1).unwrap().as_slice(), b"hi");
    }

    #[test]
    fn test_out_of_bounds_views() {
        let bytes = SharedBytes::from_vec(vec![1, 2, 3]);
        assert!(bytes.slice(2, 2).is_none());
        assert!(bytes.tail(4).is_none());
        assert!(bytes.tail(3).unwrap().is_empty());
        assert!(bytes.slice(usize::MAX, 2).is_none());
    }

    #[test]
    fn test_clone_shares_storage() {
        let bytes = SharedBytes::from_vec(vec![9; 64]);
        let copy = bytes.clone();
        assert_eq!(bytes, copy);
        assert_eq!(copy.len(), 64);
    }
}
