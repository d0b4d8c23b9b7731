use crate::types::{LabelId, NodeId, Result};

use super::super::labels;
use super::super::record::NodeRecord;
use super::super::stores::RecordStores;
use super::{
    RelationshipGroupCursor, RelationshipSelection, RelationshipTraversalCursor, ScanMode,
    StoreCursor,
};

/// Cursor over node records.
pub struct NodeCursor<'a> {
    stores: &'a RecordStores,
    inner: StoreCursor<'a, NodeRecord>,
}

impl<'a> NodeCursor<'a> {
    /// A cursor over the node store.
    pub fn new(stores: &'a RecordStores) -> Self {
        Self {
            stores,
            inner: StoreCursor::new(&stores.nodes),
        }
    }

    /// Positions the cursor on exactly `node`.
    pub fn single(&mut self, node: NodeId) {
        self.inner.single(node.0);
    }

    /// Positions the cursor before the first node.
    pub fn scan(&mut self) {
        self.inner.scan();
    }

    /// Current positioning.
    pub fn mode(&self) -> ScanMode {
        self.inner.mode()
    }

    /// Advances to the next node in use.
    pub fn next(&mut self) -> Result<bool> {
        self.inner.next()
    }

    /// Releases the page cursor.
    pub fn close(&mut self) {
        self.inner.close();
    }

    /// Id of the current node.
    pub fn id(&self) -> NodeId {
        NodeId(self.inner.record.id)
    }

    /// The raw record.
    pub fn record(&self) -> &NodeRecord {
        &self.inner.record
    }

    /// Whether the node stores its relationships in groups.
    pub fn is_dense(&self) -> bool {
        self.inner.record.dense
    }

    /// First relationship, or first relationship group when dense.
    pub fn relationships_reference(&self) -> u64 {
        self.inner.record.next_rel
    }

    /// First property record.
    pub fn properties_reference(&self) -> u64 {
        self.inner.record.next_prop
    }

    /// Labels of the current node, sorted.
    pub fn labels(&self) -> Result<Vec<LabelId>> {
        labels::node_labels(&self.inner.record, &self.stores.node_labels)
    }

    /// Whether the current node carries `label`.
    pub fn has_label(&self, label: LabelId) -> Result<bool> {
        Ok(self.labels()?.contains(&label))
    }

    /// Points `traversal` at the relationships of the current node.
    pub fn relationships(
        &self,
        traversal: &mut RelationshipTraversalCursor<'a>,
        selection: RelationshipSelection,
    ) {
        traversal.init(
            self.inner.record.id,
            self.inner.record.next_rel,
            self.inner.record.dense,
            selection,
        );
    }

    /// Points `groups` at the relationship groups of the current node.
    pub fn relationship_groups(&self, groups: &mut RelationshipGroupCursor<'a>) -> Result<()> {
        groups.init(
            self.inner.record.id,
            self.inner.record.next_rel,
            self.inner.record.dense,
        )
    }
}
