//! Broker adapter: connects to an MQTT broker, subscribes to a downstream
//! topic carrying base64-encoded frame bytes, and publishes outbound
//! frames base64-encoded on the upstream topic.
//!
//! Topics are scoped by `network_id` so one broker can carry more than one
//! independent fleet without cross-talk.

use super::{FrameCallback, GatewayAdapter};
use crate::error::AdapterError;
use crate::frame::Frame;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rumqttc::{Client, Event, MqttOptions, Packet, QoS, Transport, TlsConfiguration};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const HANDSHAKE: &[u8] = &[crate::frame::PROTOCOL_VERSION];
const DISCONNECT_SENTINEL: &[u8] = &[0x01, 0xFE];

/// MQTT broker adapter.
pub struct BrokerAdapter {
    host: String,
    port: u16,
    use_tls: bool,
    network_id: u16,
    client: Mutex<Option<Client>>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerAdapter {
    pub fn new(host: impl Into<String>, port: u16, use_tls: bool, network_id: u16) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls,
            network_id,
            client: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        }
    }

    fn downstream_topic(&self) -> String {
        format!("/pydotbot/{:04x}/edge_to_controller", self.network_id)
    }

    fn upstream_topic(&self) -> String {
        format!("/pydotbot/{:04x}/controller_to_edge", self.network_id)
    }
}

impl GatewayAdapter for BrokerAdapter {
    fn init(&mut self, on_frame: FrameCallback) -> Result<(), AdapterError> {
        let mut options = MqttOptions::new("swarmit-controller", &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(60));
        if self.use_tls {
            options.set_transport(Transport::Tls(TlsConfiguration::Native));
        }

        let (client, mut connection) = Client::new(options, 64);
        client
            .subscribe(self.downstream_topic(), QoS::AtMostOnce)
            .map_err(|_| AdapterError::Closed)?;

        // Confirm the broker is reachable before handing control back, the
        // way a blocking connect would.
        match connection.iter().next() {
            Some(Err(source)) => {
                return Err(AdapterError::BrokerConnect {
                    host: self.host.clone(),
                    port: self.port,
                    source,
                })
            }
            _ => {}
        }

        client
            .publish(self.upstream_topic(), QoS::AtMostOnce, false, BASE64.encode(HANDSHAKE))
            .ok();

        let closed = Arc::new(AtomicBool::new(false));
        let closed_worker = closed.clone();

        let worker = std::thread::spawn(move || {
            for notification in connection.iter() {
                if closed_worker.load(Ordering::Relaxed) {
                    break;
                }
                match notification {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match BASE64.decode(&publish.payload) {
                            Ok(bytes) => match Frame::decode(&bytes) {
                                Ok(frame) => on_frame(frame),
                                Err(e) => log::warn!("frame parse error: {e}"),
                            },
                            Err(e) => log::warn!("base64 decode error: {e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("broker connection error: {e}");
                        break;
                    }
                }
            }
        });

        *self.client.lock().unwrap() = Some(client);
        self.closed = closed;
        *self.worker.lock().unwrap() = Some(worker);
        Ok(())
    }

    fn send_payload(&self, destination: u64, payload_type: u8, payload: &[u8]) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(AdapterError::Closed);
        }
        let guard = self.client.lock().unwrap();
        let Some(client) = guard.as_ref() else {
            return Err(AdapterError::Closed);
        };
        let frame = Frame::new(destination, payload_type, payload.to_vec());
        let encoded = BASE64.encode(frame.encode());
        if client
            .publish(self.upstream_topic(), QoS::AtMostOnce, false, encoded)
            .is_err()
        {
            log::warn!("broker publish failed, frame dropped");
        }
        Ok(())
    }

    fn close(&self) -> Result<(), AdapterError> {
        if let Some(client) = self.client.lock().unwrap().as_ref() {
            let _ = client.publish(
                self.upstream_topic(),
                QoS::AtMostOnce,
                false,
                BASE64.encode(DISCONNECT_SENTINEL),
            );
            let _ = client.disconnect();
        }
        self.closed.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        *self.client.lock().unwrap() = None;
        Ok(())
    }
}
