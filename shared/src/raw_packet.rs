//! Opaque, length-bounded byte buffer: the universal unit of exchange between
//! every layer of the transport stack.

use std::fmt;
use std::sync::Arc;

use crate::MAX_RAW_PACKET_LEN;

/// An immutable, shallow-copyable byte buffer with a one-byte tag at offset 0.
///
/// Producers never mutate a `RawPacket` after construction; cloning shares the
/// underlying bytes (`Arc<[u8]>`) rather than copying them, matching the
/// broadcast path's "enqueue a shared reference, no per-recipient copy"
/// requirement.
#[derive(Clone, PartialEq, Eq)]
pub struct RawPacket {
    bytes: Arc<[u8]>,
}

/// Reasons a candidate buffer cannot become a [`RawPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RawPacketError {
    #[error("packet is empty")]
    Empty,
    #[error("packet exceeds {MAX_RAW_PACKET_LEN} bytes")]
    TooLarge,
}

impl RawPacket {
    /// Builds a `RawPacket` from raw bytes, enforcing the length bounds
    /// (non-empty, at most 65 535 bytes).
    pub fn new(bytes: Vec<u8>) -> Result<Self, RawPacketError> {
        if bytes.is_empty() {
            return Err(RawPacketError::Empty);
        }
        if bytes.len() > MAX_RAW_PACKET_LEN {
            return Err(RawPacketError::TooLarge);
        }
        Ok(Self {
            bytes: Arc::from(bytes),
        })
    }

    /// The first byte of the buffer: the message type tag.
    pub fn tag(&self) -> u8 {
        self.bytes[0]
    }

    /// Payload bytes following the tag.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[1..]
    }

    /// Full buffer, tag included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        false // construction guarantees non-empty
    }
}

impl fmt::Debug for RawPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPacket")
            .field("tag", &self.tag())
            .field("len", &self.len())
            .finish()
    }
}

impl fmt::Display for RawPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawPacket(tag={}, {} bytes)", self.tag(), self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_packet() {
        assert_eq!(RawPacket::new(vec![]).unwrap_err(), RawPacketError::Empty);
    }

    #[test]
    fn accepts_max_len_packet() {
        let bytes = vec![0u8; MAX_RAW_PACKET_LEN];
        assert!(RawPacket::new(bytes).is_ok());
    }

    #[test]
    fn rejects_oversize_packet() {
        let bytes = vec![0u8; MAX_RAW_PACKET_LEN + 1];
        assert_eq!(
            RawPacket::new(bytes).unwrap_err(),
            RawPacketError::TooLarge
        );
    }

    #[test]
    fn tag_is_first_byte() {
        let p = RawPacket::new(vec![7, 1, 2, 3]).unwrap();
        assert_eq!(p.tag(), 7);
        assert_eq!(p.payload(), &[1, 2, 3]);
    }

    #[test]
    fn clone_shares_storage() {
        let p = RawPacket::new(vec![1, 2, 3]).unwrap();
        let q = p.clone();
        assert_eq!(p.as_bytes(), q.as_bytes());
    }
}
