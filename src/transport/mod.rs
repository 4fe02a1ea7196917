//! Gateway adapter: bidirectional transport to the gateway, hot-swappable
//! between a local serial link and a networked broker.
//!
//! Both variants expose the same contract and are a two-variant sum chosen
//! once at construction; there is no dynamic adapter registration.

pub mod broker;
pub mod serial;

pub use broker::BrokerAdapter;
pub use serial::SerialAdapter;

use crate::error::AdapterError;
use crate::frame::Frame;
use std::sync::Arc;

/// Callback invoked by the receive worker for every frame that parses and
/// CRC-checks cleanly. Runs on the adapter's background thread, not the
/// caller's.
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// A gateway transport: serial framing or a pub/sub broker.
pub trait GatewayAdapter: Send + Sync {
    /// Open the transport, send the one-shot handshake byte, and start the
    /// receive worker invoking `on_frame` for every decoded frame.
    fn init(&mut self, on_frame: FrameCallback) -> Result<(), AdapterError>;

    /// Send a payload to `destination` (the broadcast sentinel included).
    /// Adapters that carry the destination in the payload-framing layer
    /// itself still accept it here for a uniform contract.
    fn send_payload(&self, destination: u64, payload_type: u8, payload: &[u8]) -> Result<(), AdapterError>;

    /// Send the disconnect sentinel and release the transport. A closed
    /// adapter rejects further sends. Takes `&self` because callers hold
    /// the adapter behind a shared `Arc`; implementations use interior
    /// mutability for the handles they tear down.
    fn close(&self) -> Result<(), AdapterError>;
}
