//! Serial framing adapter.
//!
//! Wraps outbound frames in HDLC-style byte-stuffed framing with a
//! trailing CRC32, and runs a receive byte-by-byte state machine
//! (Idle -> Receiving -> Ready) that surfaces only complete, CRC-valid
//! inner payloads to the frame codec.

use super::{FrameCallback, GatewayAdapter};
use crate::error::{AdapterError, FrameError};
use crate::frame::Frame;
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const FLAG: u8 = 0x7E;
const ESC: u8 = 0x7D;
const ESC_XOR: u8 = 0x20;

const DEFAULT_READ_TIMEOUT_MS: u64 = 50;

/// One-shot handshake byte written on init so the gateway unmutes its
/// downstream.
const HANDSHAKE: &[u8] = &[crate::frame::PROTOCOL_VERSION];

/// Disconnect sentinel written on close.
const DISCONNECT_SENTINEL: &[u8] = &[0x01, 0xFE];

/// HDLC-encode a buffer: escape `FLAG`/`ESC` bytes, append a CRC32 trailer
/// computed over the unescaped payload, and wrap the whole thing in flag
/// delimiters.
pub fn hdlc_encode(payload: &[u8]) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    let crc = hasher.finalize();

    let mut inner = Vec::with_capacity(payload.len() + 4);
    inner.extend_from_slice(payload);
    inner.extend_from_slice(&crc.to_le_bytes());

    let mut out = Vec::with_capacity(inner.len() + 2);
    out.push(FLAG);
    for &byte in &inner {
        if byte == FLAG || byte == ESC {
            out.push(ESC);
            out.push(byte ^ ESC_XOR);
        } else {
            out.push(byte);
        }
    }
    out.push(FLAG);
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum HdlcState {
    Idle,
    Receiving,
}

/// Streaming HDLC decoder: feed bytes in, get complete CRC-checked inner
/// payloads out.
pub struct HdlcDecoder {
    state: HdlcState,
    buf: Vec<u8>,
    escape_next: bool,
}

impl Default for HdlcDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HdlcDecoder {
    pub fn new() -> Self {
        Self {
            state: HdlcState::Idle,
            buf: Vec::new(),
            escape_next: false,
        }
    }

    pub fn reset(&mut self) {
        self.state = HdlcState::Idle;
        self.buf.clear();
        self.escape_next = false;
    }

    /// Feed one byte. Returns `Some` once a frame delimiter closes a
    /// non-empty buffer; `Ok` carries the unescaped, CRC-stripped payload,
    /// `Err` a CRC mismatch. Noise before the first flag is ignored.
    pub fn feed_byte(&mut self, byte: u8) -> Option<Result<Vec<u8>, FrameError>> {
        match self.state {
            HdlcState::Idle => {
                if byte == FLAG {
                    self.state = HdlcState::Receiving;
                    self.buf.clear();
                    self.escape_next = false;
                }
                None
            }
            HdlcState::Receiving => {
                if byte == FLAG {
                    if self.buf.is_empty() {
                        return None;
                    }
                    let inner = std::mem::take(&mut self.buf);
                    self.state = HdlcState::Idle;
                    return Some(strip_and_check_crc(inner));
                }
                if byte == ESC {
                    self.escape_next = true;
                    return None;
                }
                let unescaped = if self.escape_next {
                    self.escape_next = false;
                    byte ^ ESC_XOR
                } else {
                    byte
                };
                self.buf.push(unescaped);
                None
            }
        }
    }
}

fn strip_and_check_crc(mut buf: Vec<u8>) -> Result<Vec<u8>, FrameError> {
    if buf.len() < 4 {
        return Err(FrameError::ShortBuffer {
            expected: 4,
            actual: buf.len(),
        });
    }
    let crc_start = buf.len() - 4;
    let received = u32::from_le_bytes(buf[crc_start..].try_into().unwrap());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[..crc_start]);
    let calculated = hasher.finalize();

    if received != calculated {
        return Err(FrameError::CrcMismatch {
            expected: calculated,
            actual: received,
        });
    }

    buf.truncate(crc_start);
    Ok(buf)
}

/// Serial framing adapter.
pub struct SerialAdapter {
    port_name: String,
    baudrate: u32,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialAdapter {
    pub fn new(port_name: impl Into<String>, baudrate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baudrate,
            writer: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        }
    }

    pub fn list_ports() -> Result<Vec<String>, AdapterError> {
        let ports = serialport::available_ports().map_err(|source| AdapterError::SerialOpen {
            port: "(enumeration)".to_string(),
            source,
        })?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

impl GatewayAdapter for SerialAdapter {
    fn init(&mut self, on_frame: FrameCallback) -> Result<(), AdapterError> {
        let port = serialport::new(&self.port_name, self.baudrate)
            .timeout(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS))
            .open()
            .map_err(|source| AdapterError::SerialOpen {
                port: self.port_name.clone(),
                source,
            })?;

        let mut reader = port.try_clone().map_err(|source| AdapterError::SerialOpen {
            port: self.port_name.clone(),
            source,
        })?;

        let mut writer = port;
        writer.write_all(HANDSHAKE).ok();
        writer.flush().ok();

        let closed = Arc::new(AtomicBool::new(false));
        let closed_worker = closed.clone();

        let worker = std::thread::spawn(move || {
            let mut decoder = HdlcDecoder::new();
            let mut buf = [0u8; 1];
            while !closed_worker.load(Ordering::Relaxed) {
                match reader.read(&mut buf) {
                    Ok(1) => {
                        if let Some(result) = decoder.feed_byte(buf[0]) {
                            match result {
                                Ok(inner) => match Frame::decode(&inner) {
                                    Ok(frame) => on_frame(frame),
                                    Err(e) => log::warn!("frame parse error: {e}"),
                                },
                                Err(e) => log::warn!("hdlc decode error: {e}"),
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                    Err(e) => {
                        log::warn!("serial read error: {e}");
                        break;
                    }
                }
            }
        });

        *self.writer.lock().unwrap() = Some(writer);
        self.closed = closed;
        *self.worker.lock().unwrap() = Some(worker);
        Ok(())
    }

    fn send_payload(&self, destination: u64, payload_type: u8, payload: &[u8]) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(AdapterError::Closed);
        }
        let mut guard = self.writer.lock().unwrap();
        let Some(writer) = guard.as_mut() else {
            return Err(AdapterError::Closed);
        };
        let frame = Frame::new(destination, payload_type, payload.to_vec());
        let encoded = hdlc_encode(&frame.encode());

        if writer.write_all(&encoded).is_err() || writer.flush().is_err() {
            log::warn!("serial write failed, frame dropped");
        }
        Ok(())
    }

    fn close(&self) -> Result<(), AdapterError> {
        if let Some(writer) = self.writer.lock().unwrap().as_mut() {
            let _ = writer.write_all(&hdlc_encode(DISCONNECT_SENTINEL));
            let _ = writer.flush();
        }
        self.closed.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        *self.writer.lock().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdlc_roundtrip() {
        let payload = vec![0x01, 0x02, 0x03, 0x04];
        let encoded = hdlc_encode(&payload);

        let mut decoder = HdlcDecoder::new();
        let mut result = None;
        for byte in encoded {
            if let Some(r) = decoder.feed_byte(byte) {
                result = Some(r);
            }
        }
        assert_eq!(result.unwrap().unwrap(), payload);
    }

    #[test]
    fn hdlc_escapes_flag_and_escape_bytes() {
        let payload = vec![FLAG, ESC, 0x00, FLAG];
        let encoded = hdlc_encode(&payload);

        // the delimiters plus two escaped pairs means more bytes than the payload
        assert!(encoded.len() > payload.len() + 2);

        let mut decoder = HdlcDecoder::new();
        let mut result = None;
        for byte in encoded {
            if let Some(r) = decoder.feed_byte(byte) {
                result = Some(r);
            }
        }
        assert_eq!(result.unwrap().unwrap(), payload);
    }

    #[test]
    fn hdlc_crc_mismatch_is_detected() {
        let mut encoded = hdlc_encode(&[0x01]);
        let len = encoded.len();
        encoded[len - 2] ^= 0xFF;

        let mut decoder = HdlcDecoder::new();
        let mut result = None;
        for byte in encoded {
            if let Some(r) = decoder.feed_byte(byte) {
                result = Some(r);
            }
        }
        assert!(matches!(result.unwrap(), Err(FrameError::CrcMismatch { .. })));
    }

    #[test]
    fn hdlc_noise_before_flag_is_ignored() {
        let payload = vec![0x20];
        let encoded = hdlc_encode(&payload);

        let mut decoder = HdlcDecoder::new();
        decoder.feed_byte(0x00);
        decoder.feed_byte(0xFF);

        let mut result = None;
        for byte in encoded {
            if let Some(r) = decoder.feed_byte(byte) {
                result = Some(r);
            }
        }
        assert!(result.unwrap().is_ok());
    }
}
