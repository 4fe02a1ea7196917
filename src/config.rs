//! Settings: everything a run needs to pick an adapter and scope a fleet.
//!
//! Loaded from an optional `swarmit.toml`, then overridden field-by-field
//! by whatever CLI flags the user actually passed.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_BAUDRATE: u32 = 1_000_000;
const DEFAULT_BROKER_PORT: u16 = 1883;
const DEFAULT_NETWORK_ID: u16 = 0;
const DEFAULT_CHUNK_TIMEOUT_MS: u64 = 500;
const DEFAULT_CHUNK_RETRIES: u32 = 5;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileSettings {
    pub serial_port: Option<String>,
    pub serial_baudrate: Option<u32>,
    pub broker_host: Option<String>,
    pub broker_port: Option<u16>,
    pub use_tls: Option<bool>,
    pub network_id: Option<u16>,
    pub devices: Option<Vec<String>>,
    pub chunk_timeout_ms: Option<u64>,
    pub chunk_retries: Option<u32>,
}

impl FileSettings {
    /// Read `path` if it exists; a missing file is not an error, it just
    /// means every setting comes from CLI flags and defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// Which gateway transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Serial,
    Broker,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub adapter: AdapterKind,
    pub serial_port: String,
    pub serial_baudrate: u32,
    pub broker_host: String,
    pub broker_port: u16,
    pub use_tls: bool,
    /// Opaque network identifier the broker adapter scopes its topics by.
    pub network_id: u16,
    pub allow_list: Vec<u64>,
    pub chunk_timeout: Duration,
    pub chunk_retries: u32,
}

impl Settings {
    /// Merge file settings with CLI overrides. `Some` CLI values always win.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve(
        file: FileSettings,
        serial_port: Option<String>,
        broker_host: Option<String>,
        broker_port: Option<u16>,
        use_tls: bool,
        network_id: Option<u16>,
        devices: Vec<String>,
        chunk_timeout_ms: Option<u64>,
        chunk_retries: Option<u32>,
    ) -> anyhow::Result<Self> {
        let adapter = if broker_host.is_some() || file.broker_host.is_some() {
            AdapterKind::Broker
        } else {
            AdapterKind::Serial
        };

        let allow_list_strings = if devices.is_empty() {
            file.devices.unwrap_or_default()
        } else {
            devices
        };
        let allow_list = allow_list_strings
            .iter()
            .map(|s| parse_address(s))
            .collect::<anyhow::Result<Vec<u64>>>()?;

        Ok(Self {
            adapter,
            serial_port: serial_port
                .or(file.serial_port)
                .unwrap_or_else(|| "/dev/ttyACM0".to_string()),
            serial_baudrate: file.serial_baudrate.unwrap_or(DEFAULT_BAUDRATE),
            broker_host: broker_host.or(file.broker_host).unwrap_or_else(|| "localhost".to_string()),
            broker_port: broker_port.or(file.broker_port).unwrap_or(DEFAULT_BROKER_PORT),
            use_tls: use_tls || file.use_tls.unwrap_or(false),
            network_id: network_id.or(file.network_id).unwrap_or(DEFAULT_NETWORK_ID),
            allow_list,
            chunk_timeout: Duration::from_millis(
                chunk_timeout_ms.or(file.chunk_timeout_ms).unwrap_or(DEFAULT_CHUNK_TIMEOUT_MS),
            ),
            chunk_retries: chunk_retries.or(file.chunk_retries).unwrap_or(DEFAULT_CHUNK_RETRIES),
        })
    }
}

/// Parse a device address given as decimal or `0x`-prefixed hex.
fn parse_address(raw: &str) -> anyhow::Result<u64> {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Ok(u64::from_str_radix(hex, 16)?)
    } else {
        Ok(raw.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_address_accepts_hex_and_decimal() {
        assert_eq!(parse_address("0x10").unwrap(), 16);
        assert_eq!(parse_address("16").unwrap(), 16);
    }

    #[test]
    fn cli_devices_override_file_devices() {
        let file = FileSettings {
            devices: Some(vec!["1".into()]),
            ..Default::default()
        };
        let settings = Settings::resolve(
            file,
            None,
            None,
            None,
            false,
            None,
            vec!["0x2".into()],
            None,
            None,
        )
        .unwrap();
        assert_eq!(settings.allow_list, vec![2]);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let settings = Settings::resolve(
            FileSettings::default(),
            None,
            None,
            None,
            false,
            None,
            vec![],
            None,
            None,
        )
        .unwrap();
        assert_eq!(settings.adapter, AdapterKind::Serial);
        assert!(settings.allow_list.is_empty());
        assert_eq!(settings.network_id, 0);
    }

    #[test]
    fn broker_host_selects_broker_adapter() {
        let settings = Settings::resolve(
            FileSettings::default(),
            None,
            Some("mqtt.local".into()),
            None,
            false,
            Some(7),
            vec![],
            None,
            None,
        )
        .unwrap();
        assert_eq!(settings.adapter, AdapterKind::Broker);
        assert_eq!(settings.network_id, 7);
    }
}
