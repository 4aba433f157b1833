//! Encoded camera frame.

use bytes::Bytes;
use std::fmt;

/// One compressed still image (typically JPEG) as an opaque byte buffer.
///
/// Cloning is cheap: the payload is reference counted and never mutated, so
/// the same frame can be handed to the stream server and the motion detector
/// at once.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Frame(Bytes);

impl Frame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame").field("len", &self.0.len()).finish()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl From<&'static [u8]> for Frame {
    fn from(data: &'static [u8]) -> Self {
        Self(Bytes::from_static(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_payload() {
        let frame = Frame::from(vec![1u8, 2, 3]);
        let copy = frame.clone();
        assert_eq!(frame.as_bytes().as_ptr(), copy.as_bytes().as_ptr());
        assert_eq!(copy.len(), 3);
    }

    #[test]
    fn test_debug_hides_payload() {
        let frame = Frame::from(&b"jpeg"[..]);
        assert_eq!(format!("{:?}", frame), "Frame { len: 4 }");
    }
}
