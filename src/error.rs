//! Error types for the controller core.
//!
//! Only adapter construction failures are meant to propagate to a caller as
//! `anyhow::Error`; everything else is returned as typed data or logged, per
//! the error handling policy of the protocol engine.

use thiserror::Error;

/// Errors raised while encoding or decoding a wire frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("buffer too short: need at least {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },

    #[error("declared length {declared} overflows remaining buffer of {remaining} bytes")]
    LengthOverflow { declared: usize, remaining: usize },

    #[error("CRC mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    CrcMismatch { expected: u32, actual: u32 },
}

/// Errors raised while interpreting a payload body for a known payload type.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown payload type: 0x{0:02X}")]
    UnknownPayloadType(u8),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Errors raised by a gateway adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to open serial port {port}: {source}")]
    SerialOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to connect to broker {host}:{port}: {source}")]
    BrokerConnect {
        host: String,
        port: u16,
        #[source]
        source: rumqttc::ConnectionError,
    },

    #[error("adapter is closed")]
    Closed,
}

/// Errors raised while driving an OTA transfer.
#[derive(Debug, Error)]
pub enum OtaError {
    #[error("start-OTA ack mismatch: expected acks from {expected:?}, got {acked:?}")]
    StartAckMismatch { expected: Vec<u64>, acked: Vec<u64> },
}
