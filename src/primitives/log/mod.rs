#![forbid(unsafe_code)]
//! Segmented transaction log.
//!
//! Every segment starts with a fixed header naming the kernel version its
//! transactions were written at. A transaction is framed as one start entry,
//! any number of command entries and one commit entry. Each entry carries its
//! own CRC so a torn tail is detected on scan.

mod files;

pub use files::{LogDamage, LogDamageKind, LogFiles, LogScan};

use crate::primitives::bytes::buf::Reader;
use crate::types::{entry_crc32, KernelVersion, PenumbraError, Result, TransactionChecksum};

const LOG_MAGIC: [u8; 4] = *b"PNLG";
/// Header layout without a kernel version byte.
pub const LOG_FORMAT_LEGACY: u8 = 1;
/// Header layout carrying the kernel version.
pub const LOG_FORMAT_CURRENT: u8 = 2;
/// Size of a segment header in bytes.
pub const LOG_HEADER_LEN: usize = 64;

const ENTRY_START: u8 = 1;
const ENTRY_COMMAND: u8 = 2;
const ENTRY_COMMIT: u8 = 3;
const ENTRY_FRAME_LEN: usize = 1 + 4 + 4;

/// Header written at the start of every log segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogHeader {
    /// Layout version of the header itself.
    pub format: u8,
    /// Kernel version of every transaction in the segment; absent in legacy headers.
    pub kernel_version: Option<KernelVersion>,
    /// Sequence number of the segment.
    pub log_version: u64,
    /// Id of the last transaction committed before this segment began.
    pub last_committed_tx_id: u64,
    /// Checksum of that transaction.
    pub previous_checksum: u32,
}

impl LogHeader {
    /// Header in the current layout.
    pub fn new(
        kernel_version: KernelVersion,
        log_version: u64,
        last_committed_tx_id: u64,
        previous_checksum: u32,
    ) -> Self {
        Self {
            format: LOG_FORMAT_CURRENT,
            kernel_version: Some(kernel_version),
            log_version,
            last_committed_tx_id,
            previous_checksum,
        }
    }

    /// Kernel version of the segment, treating legacy headers as the oldest version.
    pub fn effective_kernel_version(&self) -> KernelVersion {
        self.kernel_version.unwrap_or(KernelVersion::V1)
    }

    /// Serialises the header.
    pub fn encode(&self) -> [u8; LOG_HEADER_LEN] {
        let mut buf = [0u8; LOG_HEADER_LEN];
        buf[0..4].copy_from_slice(&LOG_MAGIC);
        buf[4] = self.format;
        if self.format >= LOG_FORMAT_CURRENT {
            buf[5] = self.kernel_version.map(KernelVersion::version).unwrap_or(0);
        }
        buf[8..16].copy_from_slice(&self.log_version.to_be_bytes());
        buf[16..24].copy_from_slice(&self.last_committed_tx_id.to_be_bytes());
        buf[24..28].copy_from_slice(&self.previous_checksum.to_be_bytes());
        let crc = crc32fast::hash(&buf[..LOG_HEADER_LEN - 4]);
        buf[LOG_HEADER_LEN - 4..].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Parses and validates a header.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < LOG_HEADER_LEN {
            return Err(PenumbraError::Corruption("log header truncated"));
        }
        let src = &src[..LOG_HEADER_LEN];
        if src[0..4] != LOG_MAGIC {
            return Err(PenumbraError::Corruption("log magic mismatch"));
        }
        let mut reader = Reader::new(&src[LOG_HEADER_LEN - 4..]);
        let stored_crc = reader.u32()?;
        if crc32fast::hash(&src[..LOG_HEADER_LEN - 4]) != stored_crc {
            return Err(PenumbraError::Corruption("log header crc mismatch"));
        }
        let format = src[4];
        let kernel_version = match format {
            LOG_FORMAT_LEGACY => None,
            LOG_FORMAT_CURRENT => Some(KernelVersion::from_version(src[5])?),
            _ => return Err(PenumbraError::Corruption("unknown log header format")),
        };
        let mut reader = Reader::new(&src[8..28]);
        Ok(Self {
            format,
            kernel_version,
            log_version: reader.u64()?,
            last_committed_tx_id: reader.u64()?,
            previous_checksum: reader.u32()?,
        })
    }
}

/// Location of a byte in the log.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogPosition {
    /// Segment number.
    pub log_version: u64,
    /// Byte offset inside the segment.
    pub offset: u64,
}

/// A transaction as written to or read from the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogTransaction {
    /// Kernel version the commands were serialised with.
    pub kernel_version: KernelVersion,
    /// Commit id.
    pub tx_id: u64,
    /// Wall clock millis when the transaction was appended.
    pub time_written: u64,
    /// Serialised commands.
    pub commands: Vec<Vec<u8>>,
}

/// A transaction recovered from the log with its framing metadata.
#[derive(Clone, Debug)]
pub struct CommittedTransaction {
    /// The transaction body.
    pub transaction: LogTransaction,
    /// Where the start entry sits.
    pub position: LogPosition,
    /// Checksum recorded in the commit entry.
    pub checksum: u32,
}

fn start_payload(tx: &LogTransaction, previous_checksum: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(21);
    out.push(tx.kernel_version.version());
    out.extend_from_slice(&tx.tx_id.to_be_bytes());
    out.extend_from_slice(&tx.time_written.to_be_bytes());
    out.extend_from_slice(&previous_checksum.to_be_bytes());
    out
}

fn push_entry(out: &mut Vec<u8>, kind: u8, payload: &[u8]) {
    out.push(kind);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&entry_crc32(kind, payload).to_be_bytes());
}

/// Frames a transaction; returns the bytes and the transaction checksum.
pub(crate) fn encode_transaction(tx: &LogTransaction, previous_checksum: u32) -> (Vec<u8>, u32) {
    let start = start_payload(tx, previous_checksum);
    let mut checksum = TransactionChecksum::begin(&start);
    let body: usize = tx.commands.iter().map(|c| c.len() + ENTRY_FRAME_LEN).sum();
    let mut out = Vec::with_capacity(body + 64);
    push_entry(&mut out, ENTRY_START, &start);
    for command in &tx.commands {
        checksum.command(command);
        push_entry(&mut out, ENTRY_COMMAND, command);
    }
    let checksum = checksum.finish();
    let mut commit = Vec::with_capacity(12);
    commit.extend_from_slice(&tx.tx_id.to_be_bytes());
    commit.extend_from_slice(&checksum.to_be_bytes());
    push_entry(&mut out, ENTRY_COMMIT, &commit);
    (out, checksum)
}

pub(crate) struct StartEntry {
    pub kernel_version: KernelVersion,
    pub tx_id: u64,
    pub time_written: u64,
    pub previous_checksum: u32,
}

pub(crate) fn decode_start(payload: &[u8]) -> Result<StartEntry> {
    let mut reader = Reader::new(payload);
    Ok(StartEntry {
        kernel_version: KernelVersion::from_version(reader.u8()?)?,
        tx_id: reader.u64()?,
        time_written: reader.u64()?,
        previous_checksum: reader.u32()?,
    })
}

pub(crate) fn decode_commit(payload: &[u8]) -> Result<(u64, u32)> {
    let mut reader = Reader::new(payload);
    Ok((reader.u64()?, reader.u32()?))
}
