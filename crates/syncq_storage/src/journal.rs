//! Framed record journal.
//!
//! Every durable syncq table is a sequence of records appended to a
//! [`StorageBackend`]. Each record is framed as:
//!
//! ```text
//! | magic "SQJL" (4) | version u16 LE | length u32 LE | payload | crc32 u32 LE |
//! ```
//!
//! The CRC covers the header and payload. A crash in the middle of an
//! append leaves a short or CRC-failing record at the very end of the
//! journal; replay reports it as a torn tail and [`Journal::recover`]
//! cuts it off. A bad record anywhere else is corruption.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// Magic bytes opening every journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"SQJL";

/// Current journal frame version.
pub const JOURNAL_VERSION: u16 = 1;

const HEADER_SIZE: usize = 10;
const CRC_SIZE: usize = 4;

/// Result of scanning a journal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Replay {
    /// Record payloads in append order.
    pub records: Vec<Vec<u8>>,
    /// Length of the journal prefix holding complete, valid records.
    pub valid_len: u64,
    /// Whether an incomplete record was found after `valid_len`.
    pub torn_tail: bool,
}

/// How far an append is pushed before [`Journal::append`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Handed to the OS. Survives a process crash, not a power cut.
    Flush,
    /// Forced to the device.
    #[default]
    Sync,
}

/// An append-only journal of framed records.
#[derive(Debug)]
pub struct Journal<B: StorageBackend> {
    backend: B,
    durability: Durability,
}

impl<B: StorageBackend> Journal<B> {
    /// Wraps a backend with [`Durability::Sync`]. Nothing is read until
    /// [`replay`](Self::replay).
    pub fn new(backend: B) -> Self {
        Self::with_durability(backend, Durability::Sync)
    }

    /// Wraps a backend with the given append durability.
    pub fn with_durability(backend: B, durability: Durability) -> Self {
        Self {
            backend,
            durability,
        }
    }

    /// Append durability.
    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the journal size in bytes.
    pub fn size(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    /// Appends one record and flushes or syncs it per [`Durability`].
    ///
    /// Returns the offset of the record frame.
    pub fn append(&mut self, payload: &[u8]) -> StorageResult<u64> {
        let frame = encode_frame(payload)?;
        let offset = self.backend.append(&frame)?;
        match self.durability {
            Durability::Flush => self.backend.flush()?,
            Durability::Sync => self.backend.sync()?,
        }
        Ok(offset)
    }

    /// Scans the journal from the start.
    pub fn replay(&self) -> StorageResult<Replay> {
        let size = self.backend.size()?;
        let mut replay = Replay::default();
        let mut offset = 0u64;

        while offset < size {
            let remaining = size - offset;
            if remaining < (HEADER_SIZE + CRC_SIZE) as u64 {
                replay.torn_tail = true;
                break;
            }

            let header = self.backend.read_at(offset, HEADER_SIZE)?;
            if header[0..4] != JOURNAL_MAGIC {
                return Err(StorageError::corrupted(offset, "invalid magic"));
            }
            let version = u16::from_le_bytes([header[4], header[5]]);
            if version > JOURNAL_VERSION {
                return Err(StorageError::corrupted(
                    offset,
                    format!("unsupported version {version}"),
                ));
            }
            let len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
            let total = (HEADER_SIZE + len + CRC_SIZE) as u64;
            if total > remaining {
                replay.torn_tail = true;
                break;
            }

            let body = self.backend.read_at(offset, HEADER_SIZE + len + CRC_SIZE)?;
            let (framed, crc_bytes) = body.split_at(HEADER_SIZE + len);
            let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
            if stored != compute_crc32(framed) {
                if offset + total == size {
                    replay.torn_tail = true;
                    break;
                }
                return Err(StorageError::corrupted(offset, "checksum mismatch"));
            }

            replay.records.push(framed[HEADER_SIZE..].to_vec());
            offset += total;
            replay.valid_len = offset;
        }

        Ok(replay)
    }

    /// Replays the journal and truncates a torn tail, if any.
    pub fn recover(&mut self) -> StorageResult<Vec<Vec<u8>>> {
        let replay = self.replay()?;
        if replay.torn_tail {
            tracing::warn!(
                valid_len = replay.valid_len,
                "discarding torn record at journal tail"
            );
            self.backend.truncate(replay.valid_len)?;
            self.backend.sync()?;
        }
        Ok(replay.records)
    }

    /// Replaces the whole journal with the given records.
    ///
    /// Used for compaction. The new contents are framed in full first and
    /// handed to [`StorageBackend::replace`], so a failure at any point
    /// leaves the previous records in place.
    pub fn rewrite<'a, I>(&mut self, payloads: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut bytes = Vec::new();
        for payload in payloads {
            bytes.extend_from_slice(&encode_frame(payload)?);
        }
        self.backend.replace(&bytes)
    }
}

fn encode_frame(payload: &[u8]) -> StorageResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| StorageError::RecordTooLarge(payload.len()))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&JOURNAL_MAGIC);
    frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[index];
    }
    !crc
}
