use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::primitives::pager::{PageAccess, PageCursor, PagedFile};
use crate::types::{PenumbraError, Result};

use super::ids::IdGenerator;
use super::record::{Record, RecordLoad, IN_USE};

type RecordBuf = SmallVec<[u8; 256]>;

/// A file of fixed-size records addressed by id, read and written through the page cache.
pub struct RecordStore<R: Record> {
    file: Arc<PagedFile>,
    record_size: usize,
    records_per_page: usize,
    ids: Arc<IdGenerator>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordStore<R> {
    /// Maps a store over `file` and rebuilds its id generator from the in-use flags.
    pub fn open(file: Arc<PagedFile>, record_size: usize) -> Result<Self> {
        if record_size == 0 || record_size > file.page_size() {
            return Err(PenumbraError::Invalid("record size does not fit in a page"));
        }
        let records_per_page = file.page_size() / record_size;
        let store = Self {
            file,
            record_size,
            records_per_page,
            ids: Arc::new(IdGenerator::default()),
            _record: PhantomData,
        };
        store.rebuild_ids()?;
        Ok(store)
    }

    fn rebuild_ids(&self) -> Result<()> {
        let mut cursor = self.open_cursor(PageAccess::Read);
        let mut highest_in_use = None;
        let mut unused = Vec::new();
        let mut flags = [0u8; 1];
        for page in 0..self.file.page_count() {
            if !cursor.next(page)? {
                break;
            }
            for slot in 0..self.records_per_page {
                cursor.get_bytes(slot * self.record_size, &mut flags)?;
                let id = page * self.records_per_page as u64 + slot as u64;
                if flags[0] & IN_USE != 0 {
                    highest_in_use = Some(id);
                } else {
                    unused.push(id);
                }
            }
        }
        let high_id = highest_in_use.map(|id| id + 1).unwrap_or(0);
        self.ids.clear();
        self.ids.set_high_id_at_least(high_id);
        for id in unused.into_iter().take_while(|id| *id < high_id) {
            self.ids.free_id(id);
        }
        debug!(
            store = R::KIND,
            file = self.file.name(),
            high_id,
            free = self.ids.free_count(),
            "store.ids_rebuilt"
        );
        Ok(())
    }

    /// Opens a page cursor over the store file.
    pub fn open_cursor(&self, access: PageAccess) -> PageCursor {
        PageCursor::new(Arc::clone(&self.file), access)
    }

    /// Size of one record in bytes.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// The shared id generator.
    pub fn ids(&self) -> &Arc<IdGenerator> {
        &self.ids
    }

    /// Allocates an id.
    pub fn next_id(&self) -> u64 {
        self.ids.next_id()
    }

    /// One past the highest id allocated so far.
    pub fn high_id(&self) -> u64 {
        self.ids.high_id()
    }

    /// A cleared record for `id`.
    pub fn new_record(&self, id: u64) -> R {
        R::new(id)
    }

    fn locate(&self, id: u64) -> (u64, usize) {
        let per_page = self.records_per_page as u64;
        (id / per_page, (id % per_page) as usize * self.record_size)
    }

    /// Reads record `id` into `record` through `cursor`, validating according to `mode`.
    pub fn read_record(
        &self,
        id: u64,
        record: &mut R,
        mode: RecordLoad,
        cursor: &mut PageCursor,
    ) -> Result<()> {
        let (page, offset) = self.locate(id);
        let mut buf: RecordBuf = SmallVec::from_elem(0, self.record_size);
        if cursor.next(page)? {
            cursor.get_bytes(offset, &mut buf)?;
        }
        record.read(id, &buf);
        match mode {
            RecordLoad::Normal => {
                if !record.in_use() {
                    return Err(PenumbraError::NotFound { kind: R::KIND, id });
                }
                if !record.is_consistent() {
                    return Err(PenumbraError::CorruptionDetail(format!(
                        "{} record {id} is inconsistent",
                        R::KIND
                    )));
                }
            }
            RecordLoad::Check => {
                if !record.in_use() || !record.is_consistent() {
                    record.clear();
                }
            }
            RecordLoad::Force => {}
        }
        Ok(())
    }

    /// Reads record `id` with a short-lived cursor.
    pub fn get_record(&self, id: u64, record: &mut R, mode: RecordLoad) -> Result<()> {
        let mut cursor = self.open_cursor(PageAccess::Read);
        self.read_record(id, record, mode, &mut cursor)
    }

    /// Convenience for `get_record` into a fresh value.
    pub fn load(&self, id: u64, mode: RecordLoad) -> Result<R> {
        let mut record = R::new(id);
        self.get_record(id, &mut record, mode)?;
        Ok(record)
    }

    /// Whether record `id` has its in-use flag set.
    pub fn is_in_use(&self, id: u64) -> Result<bool> {
        let (page, offset) = self.locate(id);
        let mut cursor = self.open_cursor(PageAccess::Read);
        if !cursor.next(page)? {
            return Ok(false);
        }
        Ok(cursor.get_u8(offset)? & IN_USE != 0)
    }

    /// Writes `record` through `cursor`.
    pub fn write_record(&self, record: &R, cursor: &mut PageCursor) -> Result<()> {
        let (page, offset) = self.locate(record.id());
        let mut buf: RecordBuf = SmallVec::from_elem(0, self.record_size);
        record.write(&mut buf);
        cursor.next(page)?;
        cursor.put_bytes(offset, &buf)
    }

    /// Writes `record` with a short-lived cursor.
    pub fn update_record(&self, record: &R) -> Result<()> {
        let mut cursor = self.open_cursor(PageAccess::Write);
        self.write_record(record, &mut cursor)
    }

    /// Flushes dirty pages of this store.
    pub fn flush(&self) -> Result<()> {
        self.file.flush_and_force()
    }

    /// Deletes every record and resets id allocation.
    pub fn truncate(&self) -> Result<()> {
        self.file.truncate()?;
        self.ids.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::MemFileIo;
    use crate::primitives::pager::PageCache;
    use crate::storage::record::NodeRecord;

    fn node_store(cache: &PageCache, io: Arc<MemFileIo>) -> RecordStore<NodeRecord> {
        let file = cache.map_io("nodes", io).unwrap();
        RecordStore::open(file, NodeRecord::SIZE).unwrap()
    }

    #[test]
    fn load_modes() -> Result<()> {
        let cache = PageCache::new(256, 4);
        let store = node_store(&cache, Arc::new(MemFileIo::new()));
        let id = store.next_id();
        let mut node = NodeRecord::new(id);
        node.in_use = true;
        node.next_prop = 17;
        store.update_record(&node)?;

        assert_eq!(store.load(id, RecordLoad::Normal)?, node);
        let missing = store.load(id + 5, RecordLoad::Normal);
        assert!(matches!(missing, Err(PenumbraError::NotFound { id: 5, .. })));

        node.in_use = false;
        store.update_record(&node)?;
        let checked = store.load(id, RecordLoad::Check)?;
        assert!(!checked.in_use);
        assert_eq!(checked.next_prop, crate::types::NULL_REFERENCE);
        let forced = store.load(id, RecordLoad::Force)?;
        assert!(!forced.in_use);
        assert_eq!(forced.next_prop, 17);
        Ok(())
    }

    #[test]
    fn wide_records_round_trip_inline_and_spilled() -> Result<()> {
        use crate::storage::record::{DynamicRecord, DYNAMIC_HEADER_LEN};

        let cache = PageCache::new(1024, 8);
        for data_size in [187usize, 400] {
            let file = cache.map_io(format!("strings-{data_size}"), Arc::new(MemFileIo::new()))?;
            let store: RecordStore<DynamicRecord> = RecordStore::open(file, DYNAMIC_HEADER_LEN + data_size)?;
            let id = store.next_id();
            let record = DynamicRecord {
                id,
                in_use: true,
                start: true,
                next: 9,
                data: (0..data_size).map(|i| i as u8).collect(),
            };
            store.update_record(&record)?;
            assert_eq!(store.load(id, RecordLoad::Normal)?, record);
        }
        Ok(())
    }

    #[test]
    fn reopen_rebuilds_high_id_and_free_ids() -> Result<()> {
        let io = Arc::new(MemFileIo::new());
        {
            let cache = PageCache::new(256, 4);
            let store = node_store(&cache, Arc::clone(&io));
            for id in 0..30u64 {
                let mut node = NodeRecord::new(id);
                node.in_use = id != 4;
                store.update_record(&node)?;
            }
            cache.flush_and_force()?;
        }
        let cache = PageCache::new(256, 4);
        let store = node_store(&cache, io);
        assert_eq!(store.high_id(), 30);
        assert_eq!(store.next_id(), 4);
        assert_eq!(store.next_id(), 30);
        Ok(())
    }
}
