use crate::types::{NodeId, RelTypeId, RelationshipId, Result};

use super::super::record::RelationshipRecord;
use super::super::stores::RecordStores;
use super::{ScanMode, StoreCursor};

/// Cursor over relationship records by id.
pub struct RelationshipScanCursor<'a> {
    inner: StoreCursor<'a, RelationshipRecord>,
}

impl<'a> RelationshipScanCursor<'a> {
    /// An unpositioned cursor.
    pub fn new(stores: &'a RecordStores) -> Self {
        Self {
            inner: StoreCursor::new(&stores.relationships),
        }
    }

    /// Positions the cursor on exactly `relationship`.
    pub fn single(&mut self, relationship: RelationshipId) {
        self.inner.single(relationship.0);
    }

    /// Positions the cursor before the first relationship.
    pub fn scan(&mut self) {
        self.inner.scan();
    }

    /// Single or scan.
    pub fn mode(&self) -> ScanMode {
        self.inner.mode()
    }

    /// Advances to the next relationship in use.
    pub fn next(&mut self) -> Result<bool> {
        self.inner.next()
    }

    /// Releases the pinned page.
    pub fn close(&mut self) {
        self.inner.close();
    }

    /// Id of the current relationship.
    pub fn id(&self) -> RelationshipId {
        RelationshipId(self.inner.record.id)
    }

    /// Its type.
    pub fn rel_type(&self) -> RelTypeId {
        RelTypeId(self.inner.record.rel_type)
    }

    /// Its start node.
    pub fn source(&self) -> NodeId {
        NodeId(self.inner.record.first_node)
    }

    /// Its end node.
    pub fn target(&self) -> NodeId {
        NodeId(self.inner.record.second_node)
    }

    /// Its first property record.
    pub fn properties_reference(&self) -> u64 {
        self.inner.record.next_prop
    }

    /// The raw record.
    pub fn record(&self) -> &RelationshipRecord {
        &self.inner.record
    }
}
