//! Controller façade: owns the adapter, the registry, and the active OTA
//! session, and installs the inbound dispatch that keeps them in sync with
//! whatever the gateway reports.

use crate::engine::CommandEngine;
use crate::frame::Frame;
use crate::ota::OtaSession;
use crate::protocol::{decode_payload, Payload};
use crate::registry::{Registry, Status};
use crate::transport::{FrameCallback, GatewayAdapter};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Owns one gateway link for the lifetime of a run.
pub struct Controller {
    adapter: Arc<dyn GatewayAdapter>,
    registry: Arc<Mutex<Registry>>,
    ota: Arc<Mutex<Option<OtaSession>>>,
    engine: CommandEngine,
}

impl Controller {
    /// Open `adapter` and wire its inbound frames into `registry`/the OTA
    /// session, filtered by `allow_list`.
    pub fn start(
        mut adapter: Box<dyn GatewayAdapter>,
        allow_list: Vec<u64>,
    ) -> Result<Self, crate::error::AdapterError> {
        let registry = Arc::new(Mutex::new(Registry::new(allow_list.clone())));
        let ota: Arc<Mutex<Option<OtaSession>>> = Arc::new(Mutex::new(None));

        let dispatch_registry = registry.clone();
        let dispatch_ota = ota.clone();
        let dispatch_allow_list = allow_list;

        let on_frame: FrameCallback = Arc::new(move |frame: Frame| {
            dispatch_frame(&dispatch_registry, &dispatch_ota, &dispatch_allow_list, frame);
        });

        adapter.init(on_frame)?;
        let adapter: Arc<dyn GatewayAdapter> = Arc::from(adapter);
        let engine = CommandEngine::new(adapter.clone(), registry.clone());

        Ok(Self {
            adapter,
            registry,
            ota,
            engine,
        })
    }

    pub fn engine(&self) -> &CommandEngine {
        &self.engine
    }

    pub fn registry(&self) -> Arc<Mutex<Registry>> {
        self.registry.clone()
    }

    /// Begin an OTA transfer: announce the image to every ready target,
    /// wait for start acks, then drive the chunk retry loop to completion
    /// or exhaustion.
    ///
    /// No transfer is started for an address that isn't in `ready_devices`;
    /// those are filtered out silently. A ready device that never acks the
    /// start request is a fatal error: the caller gets
    /// [`crate::error::OtaError::StartAckMismatch`] instead of a silently
    /// short-handed transfer.
    pub fn flash(
        &self,
        firmware: &[u8],
        chunk_timeout: Duration,
        chunk_retries: u32,
    ) -> Result<OtaOutcome, crate::error::OtaError> {
        let allow_list = self.registry.lock().unwrap().allow_list().to_vec();
        let targets = self.registry.lock().unwrap().fanout_targets();
        let ready = self.registry.lock().unwrap().ready();

        let mut session = OtaSession::with_settings(firmware, chunk_timeout, chunk_retries);
        let expected: Vec<u64> = if allow_list.is_empty() {
            ready
        } else {
            allow_list.into_iter().filter(|a| ready.contains(a)).collect()
        };
        session.init_transfer(&expected);

        let start_payload = Payload::OtaStartRequest {
            fw_length: session.fw_length(),
            fw_chunk_count: session.chunk_count(),
            fw_hash: session.fw_hash(),
        };
        for &destination in &targets {
            self.send(destination, &start_payload);
        }

        let start_deadline = Instant::now() + crate::engine::COMMAND_TIMEOUT;
        while Instant::now() < start_deadline {
            if expected.iter().all(|addr| session.has_start_ack(*addr)) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let acked: Vec<u64> = expected.iter().copied().filter(|addr| session.has_start_ack(*addr)).collect();
        if acked.len() != expected.len() {
            return Err(crate::error::OtaError::StartAckMismatch { expected, acked });
        }

        *self.ota.lock().unwrap() = Some(session);

        loop {
            let mut done = true;
            let chunks_snapshot;
            {
                let guard = self.ota.lock().unwrap();
                let session = guard.as_ref().unwrap();
                chunks_snapshot = session.chunks().to_vec();
                for &addr in &expected {
                    if !session.is_complete(addr) && session.failed_chunks(addr).is_empty() {
                        done = false;
                    }
                }
            }
            if done {
                break;
            }

            for &addr in &expected {
                let due = {
                    let guard = self.ota.lock().unwrap();
                    guard.as_ref().unwrap().due_chunks(addr, Instant::now())
                };
                for index in due {
                    let chunk = &chunks_snapshot[index as usize];
                    self.send(
                        addr,
                        &Payload::OtaChunkRequest {
                            index: chunk.index,
                            chunk: chunk.data.clone(),
                        },
                    );
                    let mut guard = self.ota.lock().unwrap();
                    let session = guard.as_mut().unwrap();
                    let now = Instant::now();
                    session.mark_sent(addr, index, now);
                    session.bump_retry(addr, index);
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let guard = self.ota.lock().unwrap();
        let session = guard.as_ref().unwrap();
        let succeeded = expected
            .iter()
            .filter(|addr| session.is_complete(**addr) && session.transfer(**addr).unwrap().hashes_match == Some(true))
            .copied()
            .collect();
        let failed = expected
            .iter()
            .filter(|addr| !session.is_complete(**addr))
            .copied()
            .collect();

        Ok(OtaOutcome { succeeded, failed })
    }

    fn send(&self, destination: u64, payload: &Payload) {
        let body = payload.encode();
        let _ = self
            .adapter
            .send_payload(destination, payload.payload_type() as u8, &body);
    }

    /// Send the disconnect sentinel and join the receive worker.
    pub fn terminate(self) {
        let _ = self.adapter.close();
    }
}

/// Result of a completed or abandoned firmware transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaOutcome {
    pub succeeded: Vec<u64>,
    pub failed: Vec<u64>,
}

fn dispatch_frame(
    registry: &Arc<Mutex<Registry>>,
    ota: &Arc<Mutex<Option<OtaSession>>>,
    allow_list: &[u64],
    frame: Frame,
) {
    if !allow_list.is_empty() && !allow_list.contains(&frame.address) {
        return;
    }

    // Payload types below the request range are gateway-internal (link
    // handshake/teardown bytes, not application payloads) and are ignored
    // without comment.
    if frame.payload_type < crate::protocol::PayloadType::RequestStatus as u8 {
        return;
    }

    let payload = match decode_payload(frame.payload_type, &frame.payload) {
        Ok(payload) => payload,
        Err(e) => {
            log::error!("unparseable payload from {:#x}: {e}", frame.address);
            return;
        }
    };

    match payload {
        Payload::StatusNotification { status } => {
            registry.lock().unwrap().record_status(frame.address, status.into());
        }
        Payload::OtaStartAck => {
            if let Some(session) = ota.lock().unwrap().as_mut() {
                session.record_start_ack(frame.address);
            }
        }
        Payload::OtaChunkAck { index, hashes_match } => {
            if let Some(session) = ota.lock().unwrap().as_mut() {
                session.record_chunk_ack(frame.address, index, hashes_match);
            }
        }
        Payload::EventGpio { timestamp, data } => {
            log::info!("gpio event from {:#x} at {timestamp}: {} bytes", frame.address, data.len());
        }
        Payload::EventLog { timestamp, data } => {
            log::info!(
                "log event from {:#x} at {timestamp}: {}",
                frame.address,
                String::from_utf8_lossy(&data)
            );
        }
        other => {
            log::error!("unexpected inbound payload from {:#x}: {other:?}", frame.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DeviceStatus;

    #[test]
    fn dispatch_status_notification_updates_registry() {
        let registry = Arc::new(Mutex::new(Registry::new(vec![])));
        let ota = Arc::new(Mutex::new(None));
        let frame = Frame::new(
            1,
            crate::protocol::PayloadType::NotificationStatus as u8,
            Payload::StatusNotification { status: DeviceStatus::Running }.encode(),
        );
        dispatch_frame(&registry, &ota, &[], frame);
        assert_eq!(registry.lock().unwrap().known()[&1], Status::Running);
    }

    #[test]
    fn dispatch_filters_by_allow_list() {
        let registry = Arc::new(Mutex::new(Registry::new(vec![2])));
        let ota = Arc::new(Mutex::new(None));
        let frame = Frame::new(
            1,
            crate::protocol::PayloadType::NotificationStatus as u8,
            Payload::StatusNotification { status: DeviceStatus::Running }.encode(),
        );
        dispatch_frame(&registry, &ota, &[2], frame);
        assert!(registry.lock().unwrap().known().is_empty());
    }

    #[test]
    fn dispatch_ignores_gateway_internal_payload_types_silently() {
        let registry = Arc::new(Mutex::new(Registry::new(vec![])));
        let ota = Arc::new(Mutex::new(None));
        let frame = Frame::new(1, 0x01, vec![0xFF]);
        dispatch_frame(&registry, &ota, &[], frame);
        assert!(registry.lock().unwrap().known().is_empty());
    }

    #[test]
    fn dispatch_chunk_ack_updates_session() {
        let registry = Arc::new(Mutex::new(Registry::new(vec![])));
        let mut session = OtaSession::new(&[0u8; 4]);
        session.init_transfer(&[1]);
        let ota = Arc::new(Mutex::new(Some(session)));
        let frame = Frame::new(
            1,
            crate::protocol::PayloadType::NotificationOtaChunkAck as u8,
            Payload::OtaChunkAck { index: 0, hashes_match: true }.encode(),
        );
        dispatch_frame(&registry, &ota, &[], frame);
        assert!(ota.lock().unwrap().as_ref().unwrap().transfer(1).is_some());
    }
}
