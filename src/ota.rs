//! OTA engine: chunks firmware, tracks per-device transfer state, and
//! drives the retry loop that resends unacked chunks.
//!
//! Grounded in the chunked-transfer bookkeeping of a device-fleet firmware
//! push: a single SHA-256 digest covers the whole image, each chunk is
//! acknowledged individually, and a chunk that isn't acked within the
//! timeout is resent up to a retry ceiling before the transfer gives up on
//! that device.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

pub const CHUNK_SIZE: usize = 128;
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_CHUNK_RETRIES: u32 = 5;

/// One firmware chunk ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: u32,
    pub data: Vec<u8>,
}

/// Split `firmware` into fixed-size chunks (the last one short) and hash
/// the whole image.
pub fn chunk_firmware(firmware: &[u8]) -> (Vec<Chunk>, [u8; 32]) {
    let mut hasher = Sha256::new();
    hasher.update(firmware);
    let fw_hash: [u8; 32] = hasher.finalize().into();

    let chunks = firmware
        .chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(i, data)| Chunk {
            index: i as u32,
            data: data.to_vec(),
        })
        .collect();

    (chunks, fw_hash)
}

/// Per-device bookkeeping for one transfer.
#[derive(Debug, Clone)]
pub struct DeviceTransfer {
    acked: Vec<bool>,
    retries: Vec<u32>,
    last_sent: Vec<Option<Instant>>,
    /// Set once the device's own hash check comes back on the final ack.
    pub hashes_match: Option<bool>,
}

impl DeviceTransfer {
    fn new(chunk_count: usize) -> Self {
        Self {
            acked: vec![false; chunk_count],
            retries: vec![0; chunk_count],
            last_sent: vec![None; chunk_count],
            hashes_match: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.acked.iter().all(|&a| a)
    }

    /// Chunks exhausted on retries without ever being acked.
    pub fn failed_chunks(&self, retry_limit: u32) -> Vec<u32> {
        self.acked
            .iter()
            .zip(self.retries.iter())
            .enumerate()
            .filter(|(_, (acked, retries))| !**acked && **retries >= retry_limit)
            .map(|(i, _)| i as u32)
            .collect()
    }
}

/// A firmware transfer in progress across a set of devices.
pub struct OtaSession {
    chunks: Vec<Chunk>,
    fw_hash: [u8; 32],
    start_acks: HashSet<u64>,
    transfers: HashMap<u64, DeviceTransfer>,
    chunk_timeout: Duration,
    chunk_retries: u32,
}

impl OtaSession {
    pub fn new(firmware: &[u8]) -> Self {
        Self::with_settings(firmware, DEFAULT_CHUNK_TIMEOUT, DEFAULT_CHUNK_RETRIES)
    }

    pub fn with_settings(firmware: &[u8], chunk_timeout: Duration, chunk_retries: u32) -> Self {
        let (chunks, fw_hash) = chunk_firmware(firmware);
        Self {
            chunks,
            fw_hash,
            start_acks: HashSet::new(),
            transfers: HashMap::new(),
            chunk_timeout,
            chunk_retries,
        }
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn fw_hash(&self) -> [u8; 32] {
        self.fw_hash
    }

    pub fn fw_length(&self) -> u32 {
        self.chunks.iter().map(|c| c.data.len() as u32).sum()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Allocate tracking state for `targets` at the start of a transfer.
    pub fn init_transfer(&mut self, targets: &[u64]) {
        for &addr in targets {
            self.transfers
                .entry(addr)
                .or_insert_with(|| DeviceTransfer::new(self.chunks.len()));
        }
    }

    pub fn record_start_ack(&mut self, address: u64) {
        self.start_acks.insert(address);
    }

    pub fn has_start_ack(&self, address: u64) -> bool {
        self.start_acks.contains(&address)
    }

    /// Record a chunk ack from `address`. An out-of-range index is logged
    /// and dropped rather than treated as a protocol error.
    pub fn record_chunk_ack(&mut self, address: u64, index: u32, hashes_match: bool) {
        let Some(transfer) = self.transfers.get_mut(&address) else {
            log::warn!("chunk ack from unknown transfer target {address:#x}");
            return;
        };
        let Some(slot) = transfer.acked.get_mut(index as usize) else {
            log::warn!("chunk ack index {index} out of range for {address:#x}");
            return;
        };
        *slot = true;
        if index as usize == transfer.acked.len() - 1 {
            transfer.hashes_match = Some(hashes_match);
        }
    }

    pub fn mark_sent(&mut self, address: u64, index: u32, now: Instant) {
        if let Some(transfer) = self.transfers.get_mut(&address) {
            if let Some(slot) = transfer.last_sent.get_mut(index as usize) {
                *slot = Some(now);
            }
        }
    }

    /// The chunk still owed to `address`, if any is due right now.
    ///
    /// Chunks are issued strictly in ascending index order: a chunk is
    /// never sent before the one before it has been acked or abandoned
    /// (retries exhausted), so this walks the chunk list from the start
    /// and stops at the first one that is neither acked nor abandoned.
    pub fn due_chunks(&self, address: u64, now: Instant) -> Vec<u32> {
        let Some(transfer) = self.transfers.get(&address) else {
            return Vec::new();
        };
        for (i, &acked) in transfer.acked.iter().enumerate() {
            if acked {
                continue;
            }
            let abandoned = transfer.retries[i] > self.chunk_retries;
            if abandoned {
                continue;
            }
            let due = match transfer.last_sent[i] {
                None => true,
                Some(sent_at) => now.duration_since(sent_at) >= self.chunk_timeout,
            };
            return if due { vec![i as u32] } else { Vec::new() };
        }
        Vec::new()
    }

    pub fn bump_retry(&mut self, address: u64, index: u32) {
        if let Some(transfer) = self.transfers.get_mut(&address) {
            if let Some(slot) = transfer.retries.get_mut(index as usize) {
                *slot += 1;
            }
        }
    }

    pub fn is_complete(&self, address: u64) -> bool {
        self.transfers
            .get(&address)
            .map(DeviceTransfer::is_complete)
            .unwrap_or(false)
    }

    pub fn failed_chunks(&self, address: u64) -> Vec<u32> {
        self.transfers
            .get(&address)
            .map(|t| t.failed_chunks(self.chunk_retries))
            .unwrap_or_default()
    }

    pub fn transfer(&self, address: u64) -> Option<&DeviceTransfer> {
        self.transfers.get(&address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_firmware_splits_on_boundary() {
        let firmware = vec![0xAA; CHUNK_SIZE * 2 + 10];
        let (chunks, _hash) = chunk_firmware(&firmware);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].data.len(), CHUNK_SIZE);
        assert_eq!(chunks[2].data.len(), 10);
    }

    #[test]
    fn chunk_hash_is_stable_for_same_input() {
        let firmware = b"firmware-bytes".to_vec();
        let (_, hash_a) = chunk_firmware(&firmware);
        let (_, hash_b) = chunk_firmware(&firmware);
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn record_chunk_ack_out_of_range_is_ignored() {
        let mut session = OtaSession::new(&[0u8; 4]);
        session.init_transfer(&[1]);
        session.record_chunk_ack(1, 99, true);
        assert!(!session.is_complete(1));
    }

    #[test]
    fn due_chunks_returns_only_the_earliest_unacked_chunk() {
        let mut session = OtaSession::with_settings(&[0u8; CHUNK_SIZE * 2], Duration::from_millis(500), 5);
        session.init_transfer(&[1]);
        assert_eq!(session.due_chunks(1, Instant::now()), vec![0]);
    }

    #[test]
    fn chunk_one_is_not_due_until_chunk_zero_is_acked() {
        let mut session = OtaSession::with_settings(&[0u8; CHUNK_SIZE * 2], Duration::from_millis(500), 5);
        session.init_transfer(&[1]);
        let now = Instant::now();
        session.mark_sent(1, 0, now);
        // chunk 0 was just sent and isn't due for a resend yet; chunk 1
        // must not be offered in its place.
        assert_eq!(session.due_chunks(1, now), Vec::new());

        session.record_chunk_ack(1, 0, false);
        assert_eq!(session.due_chunks(1, now), vec![1]);
    }

    #[test]
    fn chunk_one_becomes_due_once_chunk_zero_is_abandoned() {
        let mut session = OtaSession::with_settings(&[0u8; CHUNK_SIZE * 2], Duration::from_millis(1), 1);
        session.init_transfer(&[1]);
        session.bump_retry(1, 0);
        session.bump_retry(1, 0);
        assert_eq!(session.due_chunks(1, Instant::now()), vec![1]);
    }

    #[test]
    fn transfer_completes_once_every_chunk_acked() {
        let mut session = OtaSession::new(&[0u8; CHUNK_SIZE + 1]);
        session.init_transfer(&[1]);
        assert!(!session.is_complete(1));
        session.record_chunk_ack(1, 0, false);
        session.record_chunk_ack(1, 1, true);
        assert!(session.is_complete(1));
        assert_eq!(session.transfer(1).unwrap().hashes_match, Some(true));
    }

    #[test]
    fn failed_chunks_reports_exhausted_retries() {
        let mut session = OtaSession::with_settings(&[0u8; 1], Duration::from_millis(1), 2);
        session.init_transfer(&[1]);
        session.bump_retry(1, 0);
        session.bump_retry(1, 0);
        assert_eq!(session.failed_chunks(1), vec![0]);
    }
}
