use crate::primitives::pager::{PageAccess, PageCursor};
use crate::types::{PropertyKeyId, Result, NULL_REFERENCE};

use super::super::props::decode_value;
use super::super::record::{PropertyBlock, PropertyRecord, PropertyType, Record, RecordLoad};
use super::super::stores::RecordStores;
use super::super::values::Value;

/// Iterates the properties of one entity's property chain.
///
/// Inline values decode straight from the block; string and array values are
/// only read from their dynamic store when [`PropertyCursor::value`] is called.
pub struct PropertyCursor<'a> {
    stores: &'a RecordStores,
    page: Option<PageCursor>,
    next_record: u64,
    record: PropertyRecord,
    block: usize,
    steps: u64,
    started: bool,
}

impl<'a> PropertyCursor<'a> {
    /// An unpositioned cursor.
    pub fn new(stores: &'a RecordStores) -> Self {
        Self {
            stores,
            page: None,
            next_record: NULL_REFERENCE,
            record: PropertyRecord::new(NULL_REFERENCE),
            block: 0,
            steps: 0,
            started: false,
        }
    }

    /// Positions the cursor before the first property of the chain at `reference`.
    pub fn init(&mut self, reference: u64) {
        self.next_record = reference;
        self.record.clear();
        self.record.blocks.clear();
        self.block = 0;
        self.steps = 0;
        self.started = false;
    }

    /// Advances to the next property.
    pub fn next(&mut self) -> Result<bool> {
        loop {
            if self.started && self.block + 1 < self.record.blocks.len() {
                self.block += 1;
                return Ok(true);
            }
            if self.next_record == NULL_REFERENCE {
                self.record.blocks.clear();
                return Ok(false);
            }
            self.steps += 1;
            if self.steps > self.stores.properties.high_id() + 1 {
                self.next_record = NULL_REFERENCE;
                continue;
            }
            let store = &self.stores.properties;
            let page = self
                .page
                .get_or_insert_with(|| store.open_cursor(PageAccess::Read));
            let id = self.next_record;
            store.read_record(id, &mut self.record, RecordLoad::Check, page)?;
            if !self.record.in_use() {
                self.next_record = NULL_REFERENCE;
                self.record.blocks.clear();
                return Ok(false);
            }
            self.next_record = self.record.next_prop;
            self.block = 0;
            self.started = true;
            if !self.record.blocks.is_empty() {
                return Ok(true);
            }
            self.started = false;
        }
    }

    fn current(&self) -> Option<&PropertyBlock> {
        self.record.blocks.get(self.block)
    }

    /// Key of the current block.
    pub fn property_key(&self) -> Option<PropertyKeyId> {
        self.current().map(PropertyBlock::key)
    }

    /// Value type of the current block.
    pub fn property_type(&self) -> Option<PropertyType> {
        self.current().and_then(PropertyBlock::property_type)
    }

    /// Decodes the current value, reading its dynamic chain when needed.
    pub fn value(&self) -> Result<Option<Value>> {
        self.current()
            .map(|block| decode_value(block, &self.stores.strings, &self.stores.arrays))
            .transpose()
    }

    /// Id of the property record holding the current block.
    pub fn record_id(&self) -> u64 {
        self.record.id
    }

    /// Releases the pinned page.
    pub fn close(&mut self) {
        if let Some(mut page) = self.page.take() {
            page.close();
        }
        self.init(NULL_REFERENCE);
    }
}
