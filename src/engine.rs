//! Command engine: request/response state machines for status, start,
//! stop, reset, and message.
//!
//! Every operation follows the same shape: build a payload, send it
//! (broadcast or per-device), poll the registry at a 10 ms cadence until a
//! done predicate holds or a timeout elapses, then return the set of
//! addresses now in the target state. Polling, not condition variables, is
//! the synchronization primitive so the state machine stays trivially
//! observable and deterministic under test.

use crate::frame::BROADCAST_ADDRESS;
use crate::protocol::Payload;
use crate::registry::{Registry, Status};
use crate::transport::GatewayAdapter;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const STATUS_TIMEOUT: Duration = Duration::from_secs(2);
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Issues frames and waits for the effects to land in the registry.
pub struct CommandEngine {
    adapter: Arc<dyn GatewayAdapter>,
    registry: Arc<Mutex<Registry>>,
}

impl CommandEngine {
    pub fn new(adapter: Arc<dyn GatewayAdapter>, registry: Arc<Mutex<Registry>>) -> Self {
        Self { adapter, registry }
    }

    fn send(&self, destination: u64, payload: &Payload) {
        let body = payload.encode();
        let _ = self
            .adapter
            .send_payload(destination, payload.payload_type() as u8, &body);
    }

    fn allow_list(&self) -> Vec<u64> {
        self.registry.lock().unwrap().allow_list().to_vec()
    }

    /// Poll `predicate` against the registry until it returns true or
    /// `timeout` elapses.
    fn wait_until(&self, timeout: Duration, mut predicate: impl FnMut(&Registry) -> bool) {
        let start = Instant::now();
        loop {
            if predicate(&self.registry.lock().unwrap()) {
                return;
            }
            if start.elapsed() >= timeout {
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Request status from every device and return the registry snapshot
    /// after the collection window closes.
    pub fn status(&self) -> std::collections::HashMap<u64, Status> {
        self.send(BROADCAST_ADDRESS, &Payload::StatusRequest);
        std::thread::sleep(STATUS_TIMEOUT);
        self.registry.lock().unwrap().known()
    }

    /// Start the application on ready devices.
    ///
    /// Broadcast (empty allow-list): every ready device gets one
    /// broadcast `StartRequest`; the return value is read back fresh from
    /// the registry, so it reports every address currently Running
    /// whether or not this call caused the transition.
    ///
    /// Unicast (non-empty allow-list): only allow-listed devices that were
    /// ready at call time are sent a request at all; devices outside that
    /// targeted set are never reported, even if they happen to already be
    /// Running.
    pub fn start(&self) -> HashSet<u64> {
        let allow_list = self.allow_list();
        let ready = self.registry.lock().unwrap().ready();

        if allow_list.is_empty() {
            self.send(BROADCAST_ADDRESS, &Payload::StartRequest);
            let prerequisite: HashSet<u64> = ready.into_iter().collect();
            self.wait_until(COMMAND_TIMEOUT, |reg| {
                let running: HashSet<u64> = reg.addresses_with_status(Status::Running).into_iter().collect();
                prerequisite.iter().all(|addr| running.contains(addr))
            });
            self.registry
                .lock()
                .unwrap()
                .addresses_with_status(Status::Running)
                .into_iter()
                .collect()
        } else {
            let targeted: Vec<u64> = allow_list.into_iter().filter(|a| ready.contains(a)).collect();
            for &addr in &targeted {
                self.send(addr, &Payload::StartRequest);
                self.wait_until(COMMAND_TIMEOUT, |reg| {
                    reg.addresses_with_status(Status::Running).contains(&addr)
                });
            }
            let registry = self.registry.lock().unwrap();
            targeted
                .into_iter()
                .filter(|addr| registry.addresses_with_status(Status::Running).contains(addr))
                .collect()
        }
    }

    /// Stop the application on running/resetting devices. Same
    /// broadcast/unicast asymmetry as [`Self::start`]: broadcast reports
    /// every address currently Bootloader, unicast reports only the
    /// devices this call actually targeted.
    pub fn stop(&self) -> HashSet<u64> {
        let allow_list = self.allow_list();
        let prerequisite_full = self.registry.lock().unwrap().running_or_resetting();

        if allow_list.is_empty() {
            self.send(BROADCAST_ADDRESS, &Payload::StopRequest);
            let prerequisite: HashSet<u64> = prerequisite_full.into_iter().collect();
            self.wait_until(COMMAND_TIMEOUT, |reg| {
                let ready: HashSet<u64> = reg.ready().into_iter().collect();
                prerequisite.iter().all(|addr| ready.contains(addr))
            });
            self.registry.lock().unwrap().ready().into_iter().collect()
        } else {
            let targeted: Vec<u64> = allow_list
                .into_iter()
                .filter(|a| prerequisite_full.contains(a))
                .collect();
            for &addr in &targeted {
                self.send(addr, &Payload::StopRequest);
                self.wait_until(COMMAND_TIMEOUT, |reg| reg.ready().contains(&addr));
            }
            let registry = self.registry.lock().unwrap();
            targeted
                .into_iter()
                .filter(|addr| registry.ready().contains(addr))
                .collect()
        }
    }

    /// Reset devices to a declared position. Fire-and-forget, no wait.
    pub fn reset(&self, pos_x: i32, pos_y: i32) {
        let allow_list = self.allow_list();
        let payload = Payload::ResetRequest { pos_x, pos_y };
        if allow_list.is_empty() {
            self.send(BROADCAST_ADDRESS, &payload);
        } else {
            for addr in allow_list {
                self.send(addr, &payload);
            }
        }
    }

    /// Send a free-form text message. Fire-and-forget, targeted at the
    /// currently running devices.
    pub fn message(&self, text: &[u8]) {
        let allow_list = self.allow_list();
        let running = self.registry.lock().unwrap().running();
        let payload = Payload::Message { text: text.to_vec() };

        if allow_list.is_empty() {
            self.send(BROADCAST_ADDRESS, &payload);
        } else {
            for addr in allow_list.into_iter().filter(|a| running.contains(a)) {
                self.send(addr, &payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::protocol::DeviceStatus;
    use crate::transport::FrameCallback;

    struct NullAdapter;

    impl GatewayAdapter for NullAdapter {
        fn init(&mut self, _on_frame: FrameCallback) -> Result<(), AdapterError> {
            Ok(())
        }
        fn send_payload(&self, _destination: u64, _payload_type: u8, _payload: &[u8]) -> Result<(), AdapterError> {
            Ok(())
        }
        fn close(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    fn engine_with(registry: Registry) -> (CommandEngine, Arc<Mutex<Registry>>) {
        let registry = Arc::new(Mutex::new(registry));
        let engine = CommandEngine::new(Arc::new(NullAdapter), registry.clone());
        (engine, registry)
    }

    #[test]
    fn unicast_start_ignores_a_device_that_isnt_ready() {
        let mut registry = Registry::new(vec![2]);
        registry.record_status(2, DeviceStatus::Running);
        let (engine, _registry) = engine_with(registry);

        assert_eq!(engine.start(), HashSet::new());
    }

    #[test]
    fn broadcast_stop_reports_every_bootloader_device_including_untouched_ones() {
        let mut registry = Registry::new(vec![]);
        registry.record_status(1, DeviceStatus::Running);
        registry.record_status(2, DeviceStatus::Resetting);
        registry.record_status(3, DeviceStatus::Bootloader);
        let (engine, registry) = engine_with(registry);

        let injector = registry.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let mut reg = injector.lock().unwrap();
            reg.record_status(1, DeviceStatus::Bootloader);
            reg.record_status(2, DeviceStatus::Bootloader);
        });

        let mut result: Vec<u64> = engine.stop().into_iter().collect();
        result.sort();
        assert_eq!(result, vec![1, 2, 3]);
    }

    #[test]
    fn unicast_stop_only_reports_targeted_devices() {
        let mut registry = Registry::new(vec![1]);
        registry.record_status(1, DeviceStatus::Running);
        registry.record_status(2, DeviceStatus::Running);
        let (engine, registry) = engine_with(registry);

        let injector = registry.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            injector.lock().unwrap().record_status(1, DeviceStatus::Bootloader);
        });

        assert_eq!(engine.stop(), HashSet::from([1]));
    }
}
