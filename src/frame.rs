//! Framed message codec for the tunnel wire protocol
//!
//! After the initial TEXT authentication message, every WebSocket message on
//! a session is BINARY and carries one framed message:
//!
//! ```text
//! +----------------+---------------------------+
//! | correlation id |  opaque DNS datagram      |
//! |   (4 bytes)    |  (0 ..= 65,507 bytes)     |
//! +----------------+---------------------------+
//! ```
//!
//! The correlation id is big-endian on the wire, on both sides. The payload
//! is never inspected; it is the exact UDP datagram received from (or
//! destined for) a stub resolver or the upstream resolver.

use thiserror::Error;

/// Length of the correlation id prefix.
pub const ID_LEN: usize = 4;

/// Largest UDP payload that fits a single IPv4 datagram.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// Largest framed message accepted on the wire.
pub const MAX_FRAME_LEN: usize = ID_LEN + MAX_DATAGRAM_LEN;

/// Errors produced when decoding an inbound framed message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Message shorter than the id prefix.
    #[error("framed message truncated: {len} bytes, need at least 4")]
    Truncated { len: usize },

    /// Payload exceeds the maximum UDP datagram size.
    #[error("framed payload too large: {len} bytes")]
    Oversized { len: usize },
}

/// One framed message: a correlation id and an opaque DNS datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation id pairing a response with its query.
    pub id: u32,
    /// Opaque DNS wire-format datagram.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame from an id and payload.
    pub fn new(id: u32, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Serialize into wire form: 4-byte big-endian id followed by the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ID_LEN + self.payload.len());
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a framed message from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Truncated`] if `bytes` is shorter than the id
    /// prefix, [`FrameError::Oversized`] if the payload exceeds
    /// [`MAX_DATAGRAM_LEN`].
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < ID_LEN {
            return Err(FrameError::Truncated { len: bytes.len() });
        }
        let payload_len = bytes.len() - ID_LEN;
        if payload_len > MAX_DATAGRAM_LEN {
            return Err(FrameError::Oversized { len: payload_len });
        }
        let id = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(Self {
            id,
            payload: bytes[ID_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_prefixes_big_endian_id() {
        let frame = Frame::new(0x0102_0304, vec![0xAA, 0xBB]);
        assert_eq!(frame.encode(), vec![0x01, 0x02, 0x03, 0x04, 0xAA, 0xBB]);
    }

    #[test]
    fn decode_roundtrip() {
        let frame = Frame::new(u32::MAX, b"\x12\x34query".to_vec());
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_empty_payload() {
        let decoded = Frame::decode(&[0, 0, 0, 7]).unwrap();
        assert_eq!(decoded.id, 7);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn decode_rejects_truncated() {
        assert_eq!(Frame::decode(&[1, 2, 3]), Err(FrameError::Truncated { len: 3 }));
        assert_eq!(Frame::decode(&[]), Err(FrameError::Truncated { len: 0 }));
    }

    #[test]
    fn decode_rejects_oversized() {
        let bytes = vec![0u8; MAX_FRAME_LEN + 1];
        assert_eq!(
            Frame::decode(&bytes),
            Err(FrameError::Oversized {
                len: MAX_DATAGRAM_LEN + 1
            })
        );
    }

    #[test]
    fn decode_accepts_max_datagram() {
        let bytes = vec![0u8; MAX_FRAME_LEN];
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.payload.len(), MAX_DATAGRAM_LEN);
    }
}
