//! Store-wide metadata kept at fixed record positions.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::primitives::pager::PagedFile;
use crate::types::{KernelVersion, Result, TxId};

use super::record::{MetaRecord, RecordLoad};
use super::store::RecordStore;

/// Format version of the record store files written by this build.
pub const STORE_FORMAT_VERSION: u64 = 1;

/// Slots of the metadata store.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum MetaPosition {
    /// Record file format.
    StoreVersion = 0,
    /// Kernel version the store is at.
    KernelVersion = 1,
    /// Id of the last transaction applied to the stores.
    LastCommittedTx = 2,
    /// Id of the last transaction covered by a checkpoint.
    LastClosedTx = 3,
    /// Current transaction log segment.
    LogVersion = 4,
    /// Milliseconds since the epoch when the store was created.
    CreationTime = 5,
    /// Random identifier of this store.
    RandomId = 6,
}

impl MetaPosition {
    const ALL: [MetaPosition; 7] = [
        MetaPosition::StoreVersion,
        MetaPosition::KernelVersion,
        MetaPosition::LastCommittedTx,
        MetaPosition::LastClosedTx,
        MetaPosition::LogVersion,
        MetaPosition::CreationTime,
        MetaPosition::RandomId,
    ];
}

/// Metadata store.
pub struct MetaDataStore {
    records: RecordStore<MetaRecord>,
}

impl MetaDataStore {
    /// Opens the store, initialising every slot when it is new.
    pub fn open(file: Arc<PagedFile>, initial_kernel_version: KernelVersion) -> Result<Self> {
        let store = Self {
            records: RecordStore::open(file, MetaRecord::SIZE)?,
        };
        if !store.records.is_in_use(MetaPosition::StoreVersion as u64)? {
            let created = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            for position in MetaPosition::ALL {
                let value = match position {
                    MetaPosition::StoreVersion => STORE_FORMAT_VERSION,
                    MetaPosition::KernelVersion => initial_kernel_version.version() as u64,
                    MetaPosition::CreationTime => created,
                    MetaPosition::RandomId => rand::random::<u64>(),
                    _ => 0,
                };
                store.set(position, value)?;
            }
            store.records.ids().set_high_id_at_least(MetaPosition::ALL.len() as u64);
            debug!(kernel_version = %initial_kernel_version, "meta.initialised");
        }
        Ok(store)
    }

    /// Reads a slot.
    pub fn get(&self, position: MetaPosition) -> Result<u64> {
        Ok(self.records.load(position as u64, RecordLoad::Normal)?.value)
    }

    /// Writes a slot.
    pub fn set(&self, position: MetaPosition, value: u64) -> Result<()> {
        self.records.update_record(&MetaRecord {
            id: position as u64,
            in_use: true,
            value,
        })
    }

    /// Kernel version recorded in the store.
    pub fn kernel_version(&self) -> Result<KernelVersion> {
        KernelVersion::from_version(self.get(MetaPosition::KernelVersion)? as u8)
    }

    /// Records a new kernel version.
    pub fn set_kernel_version(&self, version: KernelVersion) -> Result<()> {
        self.set(MetaPosition::KernelVersion, version.version() as u64)
    }

    /// Last applied transaction.
    pub fn last_committed_tx(&self) -> Result<TxId> {
        Ok(TxId(self.get(MetaPosition::LastCommittedTx)?))
    }

    /// Raises the last applied transaction id; lower ids are ignored.
    pub fn advance_last_committed_tx(&self, tx: TxId) -> Result<()> {
        if tx > self.last_committed_tx()? {
            self.set(MetaPosition::LastCommittedTx, tx.0)?;
        }
        Ok(())
    }

    /// Last checkpointed transaction.
    pub fn last_closed_tx(&self) -> Result<TxId> {
        Ok(TxId(self.get(MetaPosition::LastClosedTx)?))
    }

    /// Store identifier.
    pub fn random_id(&self) -> Result<u64> {
        self.get(MetaPosition::RandomId)
    }

    /// Forces the store to disk.
    pub fn flush(&self) -> Result<()> {
        self.records.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::MemFileIo;
    use crate::primitives::pager::PageCache;

    #[test]
    fn new_store_is_initialised_once() -> Result<()> {
        let cache = PageCache::new(256, 2);
        let file = cache.map_io("meta", Arc::new(MemFileIo::new()))?;
        let meta = MetaDataStore::open(Arc::clone(&file), KernelVersion::V2)?;
        assert_eq!(meta.kernel_version()?, KernelVersion::V2);
        assert_eq!(meta.get(MetaPosition::StoreVersion)?, STORE_FORMAT_VERSION);
        meta.advance_last_committed_tx(TxId(9))?;
        meta.advance_last_committed_tx(TxId(4))?;
        let id = meta.random_id()?;

        let reopened = MetaDataStore::open(file, KernelVersion::V3)?;
        assert_eq!(reopened.kernel_version()?, KernelVersion::V2);
        assert_eq!(reopened.last_committed_tx()?, TxId(9));
        assert_eq!(reopened.random_id()?, id);
        Ok(())
    }
}
