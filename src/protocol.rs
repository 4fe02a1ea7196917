//! Wire payload types and their positional field layouts.
//!
//! Each payload is a distinct record with a hand-written encode/decode pair;
//! [`PayloadType::try_from`] plus [`decode_payload`] act as the small
//! dispatch table from wire code to decoder that a statically typed target
//! wants in place of a runtime field-list interpreter.

use crate::error::ProtocolError;
use crate::frame::{read_bytes, read_u32, read_u8};

/// One-byte payload type codes carried at the start of every payload.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    RequestStatus = 0x80,
    RequestStart = 0x81,
    RequestStop = 0x82,
    RequestOtaStart = 0x83,
    RequestOtaChunk = 0x84,
    NotificationStatus = 0x85,
    NotificationOtaStartAck = 0x86,
    NotificationOtaChunkAck = 0x87,
    NotificationEventGpio = 0x88,
    NotificationEventLog = 0x89,
    Message = 0x8A,
    /// Not part of the historical wire table; assigned here to give the
    /// reset operation (spec'd in the command engine) a wire code. See
    /// DESIGN.md for the rationale.
    RequestReset = 0x8B,
}

impl TryFrom<u8> for PayloadType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x80 => Ok(Self::RequestStatus),
            0x81 => Ok(Self::RequestStart),
            0x82 => Ok(Self::RequestStop),
            0x83 => Ok(Self::RequestOtaStart),
            0x84 => Ok(Self::RequestOtaChunk),
            0x85 => Ok(Self::NotificationStatus),
            0x86 => Ok(Self::NotificationOtaStartAck),
            0x87 => Ok(Self::NotificationOtaChunkAck),
            0x88 => Ok(Self::NotificationEventGpio),
            0x89 => Ok(Self::NotificationEventLog),
            0x8A => Ok(Self::Message),
            0x8B => Ok(Self::RequestReset),
            other => Err(ProtocolError::UnknownPayloadType(other)),
        }
    }
}

/// Device lifecycle status as carried on the wire. `Off` has no wire code:
/// it is synthesized by the controller when a poll times out and is never
/// encoded or decoded here.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    Bootloader = 0,
    Running = 1,
    Programming = 2,
    Resetting = 3,
}

impl TryFrom<u8> for DeviceStatus {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Bootloader),
            1 => Ok(Self::Running),
            2 => Ok(Self::Programming),
            3 => Ok(Self::Resetting),
            other => Err(ProtocolError::UnknownPayloadType(other)),
        }
    }
}

/// A typed, decoded payload body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    StatusRequest,
    StartRequest,
    StopRequest,
    ResetRequest { pos_x: i32, pos_y: i32 },
    Message { text: Vec<u8> },
    OtaStartRequest { fw_length: u32, fw_chunk_count: u32, fw_hash: [u8; 32] },
    OtaChunkRequest { index: u32, chunk: Vec<u8> },
    StatusNotification { status: DeviceStatus },
    OtaStartAck,
    OtaChunkAck { index: u32, hashes_match: bool },
    EventGpio { timestamp: u32, data: Vec<u8> },
    EventLog { timestamp: u32, data: Vec<u8> },
}

impl Payload {
    /// The wire type code this payload encodes under.
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::StatusRequest => PayloadType::RequestStatus,
            Payload::StartRequest => PayloadType::RequestStart,
            Payload::StopRequest => PayloadType::RequestStop,
            Payload::ResetRequest { .. } => PayloadType::RequestReset,
            Payload::Message { .. } => PayloadType::Message,
            Payload::OtaStartRequest { .. } => PayloadType::RequestOtaStart,
            Payload::OtaChunkRequest { .. } => PayloadType::RequestOtaChunk,
            Payload::StatusNotification { .. } => PayloadType::NotificationStatus,
            Payload::OtaStartAck => PayloadType::NotificationOtaStartAck,
            Payload::OtaChunkAck { .. } => PayloadType::NotificationOtaChunkAck,
            Payload::EventGpio { .. } => PayloadType::NotificationEventGpio,
            Payload::EventLog { .. } => PayloadType::NotificationEventLog,
        }
    }

    /// Serialize the payload body (without the leading type byte; that
    /// lives in the frame header alongside the address).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::StatusRequest | Payload::StartRequest | Payload::StopRequest | Payload::OtaStartAck => {
                Vec::new()
            }
            Payload::ResetRequest { pos_x, pos_y } => {
                let mut buf = Vec::with_capacity(8);
                buf.extend_from_slice(&pos_x.to_le_bytes());
                buf.extend_from_slice(&pos_y.to_le_bytes());
                buf
            }
            Payload::Message { text } => {
                let mut buf = Vec::with_capacity(1 + text.len());
                buf.push(text.len() as u8);
                buf.extend_from_slice(text);
                buf
            }
            Payload::OtaStartRequest { fw_length, fw_chunk_count, fw_hash } => {
                let mut buf = Vec::with_capacity(4 + 4 + 32);
                buf.extend_from_slice(&fw_length.to_le_bytes());
                buf.extend_from_slice(&fw_chunk_count.to_le_bytes());
                buf.extend_from_slice(fw_hash);
                buf
            }
            Payload::OtaChunkRequest { index, chunk } => {
                let mut buf = Vec::with_capacity(4 + 1 + chunk.len());
                buf.extend_from_slice(&index.to_le_bytes());
                buf.push(chunk.len() as u8);
                buf.extend_from_slice(chunk);
                buf
            }
            Payload::StatusNotification { status } => vec![*status as u8],
            Payload::OtaChunkAck { index, hashes_match } => {
                let mut buf = Vec::with_capacity(5);
                buf.extend_from_slice(&index.to_le_bytes());
                buf.push(if *hashes_match { 1 } else { 0 });
                buf
            }
            Payload::EventGpio { timestamp, data } | Payload::EventLog { timestamp, data } => {
                let mut buf = Vec::with_capacity(4 + 1 + data.len());
                buf.extend_from_slice(&timestamp.to_le_bytes());
                buf.push(data.len() as u8);
                buf.extend_from_slice(data);
                buf
            }
        }
    }
}

/// Decode a payload body given its type code, per the dispatch table
/// `PayloadType -> decoder` that the wire design calls for.
pub fn decode_payload(payload_type: u8, body: &[u8]) -> Result<Payload, ProtocolError> {
    match PayloadType::try_from(payload_type)? {
        PayloadType::RequestStatus => Ok(Payload::StatusRequest),
        PayloadType::RequestStart => Ok(Payload::StartRequest),
        PayloadType::RequestStop => Ok(Payload::StopRequest),
        PayloadType::RequestReset => {
            let pos_x = read_u32(body, 0)? as i32;
            let pos_y = read_u32(body, 4)? as i32;
            Ok(Payload::ResetRequest { pos_x, pos_y })
        }
        PayloadType::Message => {
            let count = read_u8(body, 0)? as usize;
            let text = read_bytes(body, 1, count)?.to_vec();
            Ok(Payload::Message { text })
        }
        PayloadType::RequestOtaStart => {
            let fw_length = read_u32(body, 0)?;
            let fw_chunk_count = read_u32(body, 4)?;
            let hash_slice = read_bytes(body, 8, 32)?;
            let mut fw_hash = [0u8; 32];
            fw_hash.copy_from_slice(hash_slice);
            Ok(Payload::OtaStartRequest { fw_length, fw_chunk_count, fw_hash })
        }
        PayloadType::RequestOtaChunk => {
            let index = read_u32(body, 0)?;
            let count = read_u8(body, 4)? as usize;
            let chunk = read_bytes(body, 5, count)?.to_vec();
            Ok(Payload::OtaChunkRequest { index, chunk })
        }
        PayloadType::NotificationStatus => {
            let status = DeviceStatus::try_from(read_u8(body, 0)?)?;
            Ok(Payload::StatusNotification { status })
        }
        PayloadType::NotificationOtaStartAck => Ok(Payload::OtaStartAck),
        PayloadType::NotificationOtaChunkAck => {
            let index = read_u32(body, 0)?;
            let hashes_match = read_u8(body, 4)? != 0;
            Ok(Payload::OtaChunkAck { index, hashes_match })
        }
        PayloadType::NotificationEventGpio => {
            let timestamp = read_u32(body, 0)?;
            let count = read_u8(body, 4)? as usize;
            let data = read_bytes(body, 5, count)?.to_vec();
            Ok(Payload::EventGpio { timestamp, data })
        }
        PayloadType::NotificationEventLog => {
            let timestamp = read_u32(body, 0)?;
            let count = read_u8(body, 4)? as usize;
            let data = read_bytes(body, 5, count)?.to_vec();
            Ok(Payload::EventLog { timestamp, data })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_notification_roundtrip() {
        let payload = Payload::StatusNotification { status: DeviceStatus::Running };
        let body = payload.encode();
        let decoded = decode_payload(PayloadType::NotificationStatus as u8, &body).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn ota_start_request_roundtrip() {
        let payload = Payload::OtaStartRequest {
            fw_length: 130,
            fw_chunk_count: 2,
            fw_hash: [0xAB; 32],
        };
        let body = payload.encode();
        let decoded = decode_payload(PayloadType::RequestOtaStart as u8, &body).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn ota_chunk_ack_roundtrip() {
        let payload = Payload::OtaChunkAck { index: 1, hashes_match: true };
        let body = payload.encode();
        let decoded = decode_payload(PayloadType::NotificationOtaChunkAck as u8, &body).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn message_roundtrip() {
        let payload = Payload::Message { text: b"hello".to_vec() };
        let body = payload.encode();
        let decoded = decode_payload(PayloadType::Message as u8, &body).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn unknown_payload_type_is_an_error() {
        let err = decode_payload(0xFF, &[]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownPayloadType(0xFF)));
    }

    #[test]
    fn status_request_has_empty_body() {
        assert!(Payload::StatusRequest.encode().is_empty());
    }
}
