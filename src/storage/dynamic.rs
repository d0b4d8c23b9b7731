use std::sync::Arc;

use crate::primitives::pager::{PageAccess, PagedFile};
use crate::types::{PenumbraError, Result, NULL_REFERENCE};

use super::ids::IdSequence;
use super::record::{DynamicRecord, Record, RecordLoad, DYNAMIC_HEADER_LEN};
use super::store::RecordStore;

/// Store of chained variable-length payloads: long strings, arrays, label
/// sets, token names and schema rules.
pub struct DynamicStore {
    records: RecordStore<DynamicRecord>,
    data_size: usize,
}

impl DynamicStore {
    /// Maps a dynamic store whose records carry `data_size` payload bytes.
    pub fn open(file: Arc<PagedFile>, data_size: usize) -> Result<Self> {
        if data_size == 0 {
            return Err(PenumbraError::Invalid("dynamic record data size must be positive"));
        }
        Ok(Self {
            records: RecordStore::open(file, DYNAMIC_HEADER_LEN + data_size)?,
            data_size,
        })
    }

    /// Payload bytes per record.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// The underlying record store.
    pub fn records(&self) -> &RecordStore<DynamicRecord> {
        &self.records
    }

    /// Splits `bytes` into a new chain of in-use records. An empty payload
    /// still gets one record so the owner has something to point at.
    pub fn allocate_records(&self, bytes: &[u8], ids: &mut dyn IdSequence) -> Vec<DynamicRecord> {
        let mut chunks: Vec<&[u8]> = bytes.chunks(self.data_size).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let ids: Vec<u64> = chunks.iter().map(|_| ids.next_id()).collect();
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| DynamicRecord {
                id: ids[i],
                in_use: true,
                start: i == 0,
                next: ids.get(i + 1).copied().unwrap_or(NULL_REFERENCE),
                data: chunk.to_vec(),
            })
            .collect()
    }

    /// Loads every record of the chain starting at `first`.
    pub fn load_chain(&self, first: u64) -> Result<Vec<DynamicRecord>> {
        let mut cursor = self.records.open_cursor(PageAccess::Read);
        let limit = self.records.high_id() + 1;
        let mut out = Vec::new();
        let mut next = first;
        while next != NULL_REFERENCE {
            if out.len() as u64 > limit {
                return Err(PenumbraError::CorruptionDetail(format!(
                    "dynamic chain starting at {first} is cyclic"
                )));
            }
            let mut record = DynamicRecord::new(next);
            self.records
                .read_record(next, &mut record, RecordLoad::Normal, &mut cursor)?;
            next = record.next;
            out.push(record);
        }
        Ok(out)
    }

    /// Reads the payload of the chain starting at `first`.
    pub fn read_chain(&self, first: u64) -> Result<Vec<u8>> {
        Ok(concat(&self.load_chain(first)?))
    }

    /// Writes records as given, in use or not.
    pub fn write_records(&self, records: &[DynamicRecord]) -> Result<()> {
        let mut cursor = self.records.open_cursor(PageAccess::Write);
        for record in records {
            self.records.write_record(record, &mut cursor)?;
        }
        Ok(())
    }
}

/// Concatenates the payload of the in-use records of a chain, following `next` from the start record.
pub fn concat(records: &[DynamicRecord]) -> Vec<u8> {
    let live: Vec<&DynamicRecord> = records.iter().filter(|r| r.in_use).collect();
    let mut out = Vec::new();
    let mut current = live.iter().find(|r| r.start).copied();
    let mut steps = 0;
    while let Some(record) = current {
        out.extend_from_slice(&record.data);
        steps += 1;
        if steps > live.len() {
            break;
        }
        current = live.iter().find(|r| r.id == record.next).copied();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::MemFileIo;
    use crate::primitives::pager::PageCache;
    use crate::storage::ids::RenewableBatchIdSequence;

    #[test]
    fn chains_roundtrip_across_records() -> Result<()> {
        let cache = PageCache::new(512, 8);
        let store = DynamicStore::open(cache.map_io("dyn", Arc::new(MemFileIo::new()))?, 10)?;
        let mut ids = RenewableBatchIdSequence::new(Arc::clone(store.records().ids()), 4);
        let payload: Vec<u8> = (0..35u8).collect();
        let records = store.allocate_records(&payload, &mut ids);
        assert_eq!(records.len(), 4);
        assert!(records[0].start && !records[1].start);
        store.write_records(&records)?;
        assert_eq!(store.read_chain(records[0].id)?, payload);
        assert_eq!(concat(&records), payload);

        let empty = store.allocate_records(&[], &mut ids);
        assert_eq!(empty.len(), 1);
        store.write_records(&empty)?;
        assert!(store.read_chain(empty[0].id)?.is_empty());
        Ok(())
    }
}
