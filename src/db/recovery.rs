//! Startup recovery: replays committed transactions the stores have not yet
//! absorbed and prepares the log for appending.

use tracing::{info, warn};

use crate::command::CommandReaderFactory;
use crate::engine::{ApplyMode, CommandsToApply, StorageEngine};
use crate::primitives::log::{LogDamageKind, LogFiles};
use crate::types::{PenumbraError, Result, TxId};

/// What recovery found.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct RecoveryOutcome {
    /// Last transaction every store now reflects.
    pub(crate) last_tx_id: TxId,
    /// Transactions replayed from the log.
    pub(crate) replayed: usize,
}

pub(crate) fn recover(engine: &StorageEngine, log: &LogFiles) -> Result<RecoveryOutcome> {
    let scan = log.scan()?;
    let meta = &engine.stores().meta;
    let checkpoint = meta.last_closed_tx()?;

    if let Some(damage) = scan.damage {
        match damage.kind {
            LogDamageKind::Truncated => warn!(
                version = damage.position.log_version,
                offset = damage.position.offset,
                "recovery.truncated_tail"
            ),
            LogDamageKind::Corrupt if checkpoint.0 >= scan.last_tx_id => warn!(
                version = damage.position.log_version,
                offset = damage.position.offset,
                checkpoint = %checkpoint,
                "recovery.corrupt_tail_within_checkpoint"
            ),
            LogDamageKind::Corrupt => {
                return Err(PenumbraError::CorruptionDetail(format!(
                    "log segment {} is corrupt at offset {} after tx#{}, past checkpoint {}",
                    damage.position.log_version, damage.position.offset, scan.last_tx_id, checkpoint
                )));
            }
        }
    }

    let readers = CommandReaderFactory;
    let mut replayed = 0;
    for committed in &scan.transactions {
        let tx = &committed.transaction;
        if tx.tx_id <= checkpoint.0 {
            continue;
        }
        let commands = readers.read_all(tx.kernel_version, &tx.commands)?;
        engine.apply(
            &[CommandsToApply {
                tx_id: TxId(tx.tx_id),
                kernel_version: tx.kernel_version,
                commands,
            }],
            ApplyMode::Recovery,
        )?;
        replayed += 1;
    }

    engine.load_caches()?;
    engine.rebuild_indexes()?;
    log.start_appending(&scan, engine.kernel_version()?)?;

    let last_tx_id = TxId(meta.last_committed_tx()?.0.max(scan.last_tx_id));
    if replayed > 0 {
        engine.checkpoint(last_tx_id)?;
    }
    info!(
        replayed,
        checkpoint = %checkpoint,
        last_tx = %last_tx_id,
        "recovery.completed"
    );
    Ok(RecoveryOutcome {
        last_tx_id,
        replayed,
    })
}
