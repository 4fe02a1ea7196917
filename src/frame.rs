//! Frame codec.
//!
//! A frame is a header (protocol version, address) followed by a one-byte
//! payload type and the payload body. The codec is pure and synchronous: it
//! owns no I/O and does not know whether it is riding over a serial link or
//! a broker topic. Framing (HDLC byte-stuffing, base64) is the adapter's
//! concern, not this module's.
//!
//! Header layout: `version: u8 | address: u64 (LE) | payload_type: u8 | payload`.
//! The address is the source on inbound frames and the destination
//! (honoring the broadcast sentinel) on outbound frames.

use crate::error::FrameError;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Reserved address meaning "every device".
pub const BROADCAST_ADDRESS: u64 = 0xFFFF_FFFF_FFFF_FFFF;

const HEADER_LEN: usize = 1 + 8 + 1;

/// A decoded or to-be-encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub address: u64,
    pub payload_type: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(address: u64, payload_type: u8, payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            address,
            payload_type,
            payload,
        }
    }

    /// Encode into bytes ready for an adapter's framing layer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(self.version);
        buf.extend_from_slice(&self.address.to_le_bytes());
        buf.push(self.payload_type);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a complete, already-delimited buffer into a frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::ShortBuffer {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let version = bytes[0];
        let address = u64::from_le_bytes(bytes[1..9].try_into().unwrap());
        let payload_type = bytes[9];
        let payload = bytes[HEADER_LEN..].to_vec();

        Ok(Self {
            version,
            address,
            payload_type,
            payload,
        })
    }
}

/// Read a little-endian integer field out of `buf` at `offset`, checking
/// that enough bytes remain. Mirrors the positional, declared-length field
/// model the wire protocol is built on (§4.A / §6).
pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32, FrameError> {
    let end = offset + 4;
    if buf.len() < end {
        return Err(FrameError::ShortBuffer {
            expected: end,
            actual: buf.len(),
        });
    }
    Ok(u32::from_le_bytes(buf[offset..end].try_into().unwrap()))
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8, FrameError> {
    buf.get(offset).copied().ok_or(FrameError::ShortBuffer {
        expected: offset + 1,
        actual: buf.len(),
    })
}

/// Read a trailing variable-length byte string whose length was already
/// parsed out of a preceding `count` field.
pub fn read_bytes(buf: &[u8], offset: usize, count: usize) -> Result<&[u8], FrameError> {
    let end = offset + count;
    if buf.len() < end {
        return Err(FrameError::LengthOverflow {
            declared: count,
            remaining: buf.len().saturating_sub(offset),
        });
    }
    Ok(&buf[offset..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let frame = Frame::new(0x0000_0000_0000_0001, 0x80, vec![0xAA, 0xBB]);
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn encode_empty_payload() {
        let frame = Frame::new(BROADCAST_ADDRESS, 0x81, vec![]);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(bytes[0], PROTOCOL_VERSION);
    }

    #[test]
    fn decode_short_buffer_is_frame_error() {
        let err = Frame::decode(&[0x01, 0x02]).unwrap_err();
        assert!(matches!(err, FrameError::ShortBuffer { .. }));
    }

    #[test]
    fn broadcast_address_roundtrips() {
        let frame = Frame::new(BROADCAST_ADDRESS, 0x80, vec![]);
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.address, BROADCAST_ADDRESS);
    }

    #[test]
    fn read_bytes_rejects_declared_length_overflow() {
        let buf = [0x01, 0x02, 0x03];
        let err = read_bytes(&buf, 1, 10).unwrap_err();
        assert!(matches!(err, FrameError::LengthOverflow { .. }));
    }
}
