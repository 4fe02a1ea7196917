//! Device registry: the authoritative address-to-status mapping.
//!
//! Updated only on receipt of a status notification; readers get a
//! snapshot filtered by the configured device allow-list.

use crate::frame::BROADCAST_ADDRESS;
use crate::protocol::DeviceStatus;
use std::collections::HashMap;

/// Synthesized status for a device that stopped answering polls. Never
/// produced from wire data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Bootloader,
    Running,
    Programming,
    Resetting,
    Off,
}

impl From<DeviceStatus> for Status {
    fn from(value: DeviceStatus) -> Self {
        match value {
            DeviceStatus::Bootloader => Status::Bootloader,
            DeviceStatus::Running => Status::Running,
            DeviceStatus::Programming => Status::Programming,
            DeviceStatus::Resetting => Status::Resetting,
        }
    }
}

/// In-memory address -> status mapping with an optional allow-list.
#[derive(Debug, Default)]
pub struct Registry {
    statuses: HashMap<u64, Status>,
    allow_list: Vec<u64>,
}

impl Registry {
    pub fn new(allow_list: Vec<u64>) -> Self {
        Self {
            statuses: HashMap::new(),
            allow_list,
        }
    }

    /// Record a status notification from `address`. Idempotent: applying
    /// the same notification twice leaves the map unchanged the second
    /// time.
    pub fn record_status(&mut self, address: u64, status: DeviceStatus) {
        self.statuses.insert(address, status.into());
    }

    /// Synthesize `Off` for an address that did not answer a poll. Never
    /// called from wire data.
    pub fn mark_off(&mut self, address: u64) {
        self.statuses.insert(address, Status::Off);
    }

    fn allowed(&self, address: u64) -> bool {
        self.allow_list.is_empty() || self.allow_list.contains(&address)
    }

    /// Every address the registry has ever heard from, filtered by the
    /// allow-list.
    pub fn known(&self) -> HashMap<u64, Status> {
        self.statuses
            .iter()
            .filter(|(addr, _)| self.allowed(**addr))
            .map(|(addr, status)| (*addr, *status))
            .collect()
    }

    pub fn ready(&self) -> Vec<u64> {
        self.filtered_by(Status::Bootloader)
    }

    pub fn running(&self) -> Vec<u64> {
        self.statuses
            .iter()
            .filter(|(addr, status)| {
                self.allowed(**addr) && matches!(status, Status::Running | Status::Programming)
            })
            .map(|(addr, _)| *addr)
            .collect()
    }

    pub fn resetting(&self) -> Vec<u64> {
        self.filtered_by(Status::Resetting)
    }

    /// Addresses currently in exactly `status` (not a derived union).
    pub fn addresses_with_status(&self, status: Status) -> Vec<u64> {
        self.filtered_by(status)
    }

    /// Prerequisite set for `stop()`: every device running or mid-reset.
    pub fn running_or_resetting(&self) -> Vec<u64> {
        self.statuses
            .iter()
            .filter(|(addr, status)| {
                self.allowed(**addr)
                    && matches!(status, Status::Running | Status::Programming | Status::Resetting)
            })
            .map(|(addr, _)| *addr)
            .collect()
    }

    fn filtered_by(&self, status: Status) -> Vec<u64> {
        self.statuses
            .iter()
            .filter(|(addr, s)| self.allowed(**addr) && **s == status)
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Targets for a unicast-or-broadcast fan-out: the allow-list when
    /// non-empty, or the broadcast sentinel alone.
    pub fn fanout_targets(&self) -> Vec<u64> {
        if self.allow_list.is_empty() {
            vec![BROADCAST_ADDRESS]
        } else {
            self.allow_list.clone()
        }
    }

    pub fn allow_list(&self) -> &[u64] {
        &self.allow_list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_running_resetting_views() {
        let mut reg = Registry::new(vec![]);
        reg.record_status(1, DeviceStatus::Bootloader);
        reg.record_status(2, DeviceStatus::Running);
        reg.record_status(3, DeviceStatus::Resetting);
        reg.record_status(4, DeviceStatus::Programming);

        assert_eq!(reg.ready(), vec![1]);
        let mut running = reg.running();
        running.sort();
        assert_eq!(running, vec![2, 4]);
        assert_eq!(reg.resetting(), vec![3]);
    }

    #[test]
    fn allow_list_filters_every_view() {
        let mut reg = Registry::new(vec![2]);
        reg.record_status(1, DeviceStatus::Bootloader);
        reg.record_status(2, DeviceStatus::Bootloader);

        assert_eq!(reg.ready(), vec![2]);
        assert_eq!(reg.known().len(), 1);
    }

    #[test]
    fn idempotent_status_application() {
        let mut reg = Registry::new(vec![]);
        reg.record_status(1, DeviceStatus::Running);
        reg.record_status(1, DeviceStatus::Running);
        assert_eq!(reg.known().len(), 1);
        assert_eq!(reg.known()[&1], Status::Running);
    }

    #[test]
    fn off_never_comes_from_record_status() {
        let mut reg = Registry::new(vec![]);
        reg.record_status(1, DeviceStatus::Bootloader);
        reg.mark_off(2);
        assert_eq!(reg.known()[&1], Status::Bootloader);
        assert_eq!(reg.known()[&2], Status::Off);
    }

    #[test]
    fn fanout_targets_broadcast_when_allow_list_empty() {
        let reg = Registry::new(vec![]);
        assert_eq!(reg.fanout_targets(), vec![BROADCAST_ADDRESS]);
    }
}
