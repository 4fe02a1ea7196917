//! Host-side controller for a fleet of swarm devices: fleet status, the
//! start/stop/reset/message command set, and chunked, hash-verified OTA
//! firmware delivery over a serial or MQTT broker link.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod frame;
pub mod ota;
pub mod protocol;
pub mod registry;
pub mod transport;
