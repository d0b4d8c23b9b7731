use std::{
    fs,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{entry_crc32, KernelVersion, PenumbraError, Result, TransactionChecksum};

use super::{
    decode_commit, decode_start, encode_transaction, CommittedTransaction, LogHeader,
    LogPosition, LogTransaction, ENTRY_COMMAND, ENTRY_COMMIT, ENTRY_START, LOG_HEADER_LEN,
};

const SEGMENT_PREFIX: &str = "penumbra.txlog.";

/// Why a scan stopped before the end of the last segment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogDamageKind {
    /// The file ends in the middle of an entry or transaction.
    Truncated,
    /// An entry failed its checksum or framing checks.
    Corrupt,
}

/// First position of unusable bytes found by a scan.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LogDamage {
    /// Start of the transaction that could not be read.
    pub position: LogPosition,
    /// What was wrong.
    pub kind: LogDamageKind,
}

/// Result of scanning every segment.
#[derive(Debug, Default)]
pub struct LogScan {
    /// Complete transactions in log order.
    pub transactions: Vec<CommittedTransaction>,
    /// Where appends should resume.
    pub end: Option<LogPosition>,
    /// Checksum of the last complete transaction.
    pub last_checksum: u32,
    /// Id of the last complete transaction, or of the header baseline.
    pub last_tx_id: u64,
    /// Kernel version named by the newest segment header.
    pub last_kernel_version: Option<KernelVersion>,
    /// Unreadable tail, if any.
    pub damage: Option<LogDamage>,
}

struct Segment {
    header: LogHeader,
    io: StdFileIo,
    append_offset: u64,
    transactions: u64,
}

struct ActiveLog {
    segment: Option<Segment>,
    last_checksum: u32,
    last_tx_id: u64,
}

/// Owns the log directory and the segment currently being appended to.
pub struct LogFiles {
    dir: PathBuf,
    rotation_threshold: u64,
    active: Mutex<ActiveLog>,
}

impl LogFiles {
    /// Opens the log directory without writing anything.
    pub fn open(dir: &Path, rotation_threshold: u64) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            rotation_threshold: rotation_threshold.max(LOG_HEADER_LEN as u64 + 1),
            active: Mutex::new(ActiveLog {
                segment: None,
                last_checksum: 0,
                last_tx_id: 0,
            }),
        })
    }

    /// Path of segment `version`.
    pub fn segment_path(&self, version: u64) -> PathBuf {
        self.dir.join(format!("{SEGMENT_PREFIX}{version}"))
    }

    /// Existing segment numbers in ascending order.
    pub fn segment_versions(&self) -> Result<Vec<u64>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(version) = name
                .strip_prefix(SEGMENT_PREFIX)
                .and_then(|v| v.parse::<u64>().ok())
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Reads the header of segment `version`.
    pub fn read_header(&self, version: u64) -> Result<LogHeader> {
        let io = StdFileIo::open(self.segment_path(version))?;
        let mut buf = [0u8; LOG_HEADER_LEN];
        if io.len()? < LOG_HEADER_LEN as u64 {
            return Err(PenumbraError::Corruption("log header truncated"));
        }
        io.read_at(0, &mut buf)?;
        LogHeader::decode(&buf)
    }

    /// Version of the segment currently appended to.
    pub fn current_version(&self) -> Option<u64> {
        self.active
            .lock()
            .segment
            .as_ref()
            .map(|s| s.header.log_version)
    }

    /// Kernel version named by the active segment header.
    pub fn current_kernel_version(&self) -> Option<KernelVersion> {
        self.active
            .lock()
            .segment
            .as_ref()
            .map(|s| s.header.effective_kernel_version())
    }

    /// Reads every complete transaction. Damage inside any segment but the
    /// newest is corruption; damage at the end of the newest is reported.
    pub fn scan(&self) -> Result<LogScan> {
        let versions = self.segment_versions()?;
        let mut scan = LogScan::default();
        for (idx, version) in versions.iter().copied().enumerate() {
            let last = idx + 1 == versions.len();
            let io = StdFileIo::open(self.segment_path(version))?;
            let len = io.len()?;
            if len < LOG_HEADER_LEN as u64 {
                if last {
                    warn!(version, len, "log.segment_header_truncated");
                    let position = LogPosition {
                        log_version: version,
                        offset: 0,
                    };
                    scan.end = Some(position);
                    scan.damage = Some(LogDamage {
                        position,
                        kind: LogDamageKind::Truncated,
                    });
                    break;
                }
                return Err(PenumbraError::Corruption("log segment shorter than header"));
            }
            let mut buf = vec![0u8; len as usize];
            io.read_at(0, &mut buf)?;
            let header = LogHeader::decode(&buf)?;
            if scan.transactions.is_empty() && idx == 0 {
                scan.last_tx_id = header.last_committed_tx_id;
                scan.last_checksum = header.previous_checksum;
            }
            scan.last_kernel_version = Some(header.effective_kernel_version());
            let (offset, damage) = scan_segment(&buf, &header, &mut scan)?;
            scan.end = Some(LogPosition {
                log_version: version,
                offset,
            });
            if let Some(kind) = damage {
                if !last {
                    return Err(PenumbraError::CorruptionDetail(format!(
                        "log segment {version} damaged at offset {offset}"
                    )));
                }
                scan.damage = Some(LogDamage {
                    position: LogPosition {
                        log_version: version,
                        offset,
                    },
                    kind,
                });
            }
        }
        debug!(
            transactions = scan.transactions.len(),
            last_tx = scan.last_tx_id,
            "log.scan"
        );
        Ok(scan)
    }

    /// Prepares appending after `scan`. Damaged tail bytes are cut off; a
    /// missing log gets a fresh segment written at `kernel_version`.
    pub fn start_appending(&self, scan: &LogScan, kernel_version: KernelVersion) -> Result<()> {
        let mut active = self.active.lock();
        active.last_checksum = scan.last_checksum;
        active.last_tx_id = scan.last_tx_id;
        let reusable = scan.end.filter(|end| end.offset >= LOG_HEADER_LEN as u64);
        match reusable {
            Some(end) => {
                let io = StdFileIo::open(self.segment_path(end.log_version))?;
                if io.len()? > end.offset {
                    warn!(
                        version = end.log_version,
                        offset = end.offset,
                        "log.truncate_damaged_tail"
                    );
                    io.truncate(end.offset)?;
                    io.sync_all()?;
                }
                let mut header_buf = [0u8; LOG_HEADER_LEN];
                io.read_at(0, &mut header_buf)?;
                let header = LogHeader::decode(&header_buf)?;
                active.segment = Some(Segment {
                    header,
                    io,
                    append_offset: end.offset,
                    transactions: 0,
                });
            }
            None => {
                let version = scan.end.map(|end| end.log_version).unwrap_or(0);
                let segment =
                    self.create_segment(version, kernel_version, active.last_tx_id, active.last_checksum)?;
                active.segment = Some(segment);
            }
        }
        Ok(())
    }

    fn create_segment(
        &self,
        version: u64,
        kernel_version: KernelVersion,
        last_tx_id: u64,
        previous_checksum: u32,
    ) -> Result<Segment> {
        let path = self.segment_path(version);
        let io = StdFileIo::open(&path)?;
        io.truncate(0)?;
        let header = LogHeader::new(kernel_version, version, last_tx_id, previous_checksum);
        io.write_at(0, &header.encode())?;
        io.sync_all()?;
        info!(version, %kernel_version, "log.segment_created");
        Ok(Segment {
            header,
            io,
            append_offset: LOG_HEADER_LEN as u64,
            transactions: 0,
        })
    }

    fn rotate_locked(&self, active: &mut ActiveLog, kernel_version: KernelVersion) -> Result<()> {
        let next = match &active.segment {
            Some(segment) => {
                segment.io.sync_all()?;
                segment.header.log_version + 1
            }
            None => 0,
        };
        let segment = self.create_segment(next, kernel_version, active.last_tx_id, active.last_checksum)?;
        active.segment = Some(segment);
        Ok(())
    }

    /// Starts a new segment written at `kernel_version`.
    pub fn rotate(&self, kernel_version: KernelVersion) -> Result<()> {
        let mut active = self.active.lock();
        self.rotate_locked(&mut active, kernel_version)
    }

    /// Appends and forces one transaction. Rotates first when the kernel
    /// version differs from the active segment or the segment is full.
    pub fn append(&self, tx: &LogTransaction) -> Result<LogPosition> {
        let mut active = self.active.lock();
        let needs_rotation = match &active.segment {
            None => true,
            Some(segment) => {
                segment.header.effective_kernel_version() != tx.kernel_version
                    || (segment.transactions > 0 && segment.append_offset >= self.rotation_threshold)
            }
        };
        if needs_rotation {
            self.rotate_locked(&mut active, tx.kernel_version)?;
        }
        let previous_checksum = active.last_checksum;
        let (bytes, checksum) = encode_transaction(tx, previous_checksum);
        let segment = active
            .segment
            .as_mut()
            .ok_or(PenumbraError::Invalid("log has no active segment"))?;
        let position = LogPosition {
            log_version: segment.header.log_version,
            offset: segment.append_offset,
        };
        segment.io.write_at(segment.append_offset, &bytes)?;
        segment.io.sync_all()?;
        segment.append_offset += bytes.len() as u64;
        segment.transactions += 1;
        active.last_checksum = checksum;
        active.last_tx_id = tx.tx_id;
        Ok(position)
    }

    /// Forces the active segment.
    pub fn force(&self) -> Result<()> {
        match &self.active.lock().segment {
            Some(segment) => segment.io.sync_all(),
            None => Ok(()),
        }
    }

    /// Deletes every segment and starts over at segment zero.
    pub fn reset(&self, kernel_version: KernelVersion, last_tx_id: u64) -> Result<()> {
        let mut active = self.active.lock();
        active.segment = None;
        for version in self.segment_versions()? {
            fs::remove_file(self.segment_path(version))?;
        }
        active.last_tx_id = last_tx_id;
        active.last_checksum = 0;
        let segment = self.create_segment(0, kernel_version, last_tx_id, 0)?;
        active.segment = Some(segment);
        Ok(())
    }
}

enum Step {
    Entry { kind: u8, payload_start: usize, payload_end: usize, next: usize },
    End,
    Damaged(LogDamageKind),
}

fn read_entry(buf: &[u8], offset: usize) -> Step {
    if offset == buf.len() {
        return Step::End;
    }
    if buf.len() - offset < 5 {
        return Step::Damaged(LogDamageKind::Truncated);
    }
    let kind = buf[offset];
    let mut len = [0u8; 4];
    len.copy_from_slice(&buf[offset + 1..offset + 5]);
    let len = u32::from_be_bytes(len) as usize;
    let payload_start = offset + 5;
    let Some(payload_end) = payload_start.checked_add(len) else {
        return Step::Damaged(LogDamageKind::Corrupt);
    };
    if payload_end + 4 > buf.len() {
        return Step::Damaged(LogDamageKind::Truncated);
    }
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&buf[payload_end..payload_end + 4]);
    if u32::from_be_bytes(crc) != entry_crc32(kind, &buf[payload_start..payload_end]) {
        return Step::Damaged(LogDamageKind::Corrupt);
    }
    Step::Entry {
        kind,
        payload_start,
        payload_end,
        next: payload_end + 4,
    }
}

/// Parses complete transactions out of one segment. Returns the offset just
/// past the last complete transaction and the damage found after it, if any.
fn scan_segment(
    buf: &[u8],
    header: &LogHeader,
    scan: &mut LogScan,
) -> Result<(u64, Option<LogDamageKind>)> {
    let mut offset = LOG_HEADER_LEN;
    loop {
        let tx_start = offset;
        let (kind, payload_start, payload_end, next) = match read_entry(buf, offset) {
            Step::End => return Ok((tx_start as u64, None)),
            Step::Damaged(kind) => return Ok((tx_start as u64, Some(kind))),
            Step::Entry {
                kind,
                payload_start,
                payload_end,
                next,
            } => (kind, payload_start, payload_end, next),
        };
        if kind != ENTRY_START {
            return Ok((tx_start as u64, Some(LogDamageKind::Corrupt)));
        }
        let start = match decode_start(&buf[payload_start..payload_end]) {
            Ok(start) => start,
            Err(_) => return Ok((tx_start as u64, Some(LogDamageKind::Corrupt))),
        };
        let version_mismatch = header.kernel_version.is_some()
            && start.kernel_version != header.effective_kernel_version();
        if start.previous_checksum != scan.last_checksum || version_mismatch {
            return Ok((tx_start as u64, Some(LogDamageKind::Corrupt)));
        }
        let mut checksum = TransactionChecksum::begin(&buf[payload_start..payload_end]);
        let mut commands = Vec::new();
        offset = next;
        loop {
            match read_entry(buf, offset) {
                Step::End => return Ok((tx_start as u64, Some(LogDamageKind::Truncated))),
                Step::Damaged(kind) => return Ok((tx_start as u64, Some(kind))),
                Step::Entry {
                    kind: ENTRY_COMMAND,
                    payload_start,
                    payload_end,
                    next,
                } => {
                    let command = &buf[payload_start..payload_end];
                    checksum.command(command);
                    commands.push(command.to_vec());
                    offset = next;
                }
                Step::Entry {
                    kind: ENTRY_COMMIT,
                    payload_start,
                    payload_end,
                    next,
                } => {
                    let Ok((tx_id, stored)) = decode_commit(&buf[payload_start..payload_end]) else {
                        return Ok((tx_start as u64, Some(LogDamageKind::Corrupt)));
                    };
                    let computed = checksum.finish();
                    if tx_id != start.tx_id || stored != computed {
                        return Ok((tx_start as u64, Some(LogDamageKind::Corrupt)));
                    }
                    scan.transactions.push(CommittedTransaction {
                        transaction: LogTransaction {
                            kernel_version: start.kernel_version,
                            tx_id,
                            time_written: start.time_written,
                            commands,
                        },
                        position: LogPosition {
                            log_version: header.log_version,
                            offset: tx_start as u64,
                        },
                        checksum: computed,
                    });
                    scan.last_checksum = computed;
                    scan.last_tx_id = tx_id;
                    offset = next;
                    break;
                }
                Step::Entry { .. } => return Ok((tx_start as u64, Some(LogDamageKind::Corrupt))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tx(kernel_version: KernelVersion, tx_id: u64) -> LogTransaction {
        LogTransaction {
            kernel_version,
            tx_id,
            time_written: tx_id * 10,
            commands: vec![vec![tx_id as u8; 5], vec![1, 2]],
        }
    }

    #[test]
    fn append_scan_and_rotate_on_kernel_change() -> Result<()> {
        let dir = tempdir()?;
        let log = LogFiles::open(dir.path(), 1 << 20)?;
        let empty = log.scan()?;
        log.start_appending(&empty, KernelVersion::V2)?;
        log.append(&tx(KernelVersion::V2, 1))?;
        log.append(&tx(KernelVersion::V2, 2))?;
        let pos = log.append(&tx(KernelVersion::V3, 3))?;
        assert_eq!(pos.log_version, 1);
        assert_eq!(log.segment_versions()?, vec![0, 1]);
        assert_eq!(log.read_header(0)?.kernel_version, Some(KernelVersion::V2));
        assert_eq!(log.read_header(1)?.kernel_version, Some(KernelVersion::V3));
        assert_eq!(log.read_header(1)?.last_committed_tx_id, 2);

        let scan = log.scan()?;
        let ids: Vec<u64> = scan.transactions.iter().map(|t| t.transaction.tx_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(scan.damage.is_none());
        assert_eq!(scan.transactions[2].transaction, tx(KernelVersion::V3, 3));
        Ok(())
    }

    #[test]
    fn header_only_segments_are_skipped() -> Result<()> {
        let dir = tempdir()?;
        let log = LogFiles::open(dir.path(), 1 << 20)?;
        log.start_appending(&log.scan()?, KernelVersion::V2)?;
        log.append(&tx(KernelVersion::V2, 1))?;
        log.rotate(KernelVersion::V2)?;
        log.rotate(KernelVersion::V3)?;
        log.append(&tx(KernelVersion::V3, 2))?;
        let scan = log.scan()?;
        assert_eq!(scan.transactions.len(), 2);
        assert_eq!(scan.last_tx_id, 2);
        assert_eq!(log.segment_versions()?, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn torn_tail_is_reported_and_cut() -> Result<()> {
        let dir = tempdir()?;
        let log = LogFiles::open(dir.path(), 1 << 20)?;
        log.start_appending(&log.scan()?, KernelVersion::V3)?;
        log.append(&tx(KernelVersion::V3, 1))?;
        let pos = log.append(&tx(KernelVersion::V3, 2))?;
        drop(log);
        let path = dir.path().join(format!("{SEGMENT_PREFIX}0"));
        let len = fs::metadata(&path)?.len();
        let file = fs::OpenOptions::new().write(true).open(&path)?;
        file.set_len(len - 3)?;

        let log = LogFiles::open(dir.path(), 1 << 20)?;
        let scan = log.scan()?;
        assert_eq!(scan.transactions.len(), 1);
        let damage = scan.damage.expect("damage");
        assert_eq!(damage.kind, LogDamageKind::Truncated);
        assert_eq!(damage.position, pos);
        log.start_appending(&scan, KernelVersion::V3)?;
        log.append(&tx(KernelVersion::V3, 2))?;
        let rescan = log.scan()?;
        assert_eq!(rescan.transactions.len(), 2);
        assert!(rescan.damage.is_none());
        Ok(())
    }

    #[test]
    fn rotation_by_size() -> Result<()> {
        let dir = tempdir()?;
        let log = LogFiles::open(dir.path(), 128)?;
        log.start_appending(&log.scan()?, KernelVersion::V3)?;
        for id in 1..=6 {
            log.append(&tx(KernelVersion::V3, id))?;
        }
        assert!(log.segment_versions()?.len() > 1);
        assert_eq!(log.scan()?.transactions.len(), 6);
        Ok(())
    }
}
