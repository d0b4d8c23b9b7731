//! Reads that merge committed store state with a transaction overlay.

use std::collections::BTreeSet;

use crate::engine::{read_properties, StorageEngine};
use crate::storage::cursor::{
    Direction, NodeCursor, RelationshipGroupCursor, RelationshipScanCursor,
    RelationshipSelection, RelationshipTraversalCursor,
};
use crate::storage::record::RecordLoad;
use crate::storage::Value;
use crate::txstate::TxState;
use crate::types::{
    LabelId, NodeId, PenumbraError, PropertyKeyId, RelTypeId, RelationshipId, Result, NULL_REFERENCE,
};

/// A relationship as seen by a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RelationshipView {
    /// Relationship id.
    pub id: RelationshipId,
    /// Relationship type.
    pub rel_type: RelTypeId,
    /// Start node.
    pub start: NodeId,
    /// End node.
    pub end: NodeId,
}

impl RelationshipView {
    /// The endpoint opposite `node`; `node` itself for a loop.
    pub fn other_node(&self, node: NodeId) -> NodeId {
        if self.start == node {
            self.end
        } else {
            self.start
        }
    }

    fn selected(&self, node: NodeId, selection: &RelationshipSelection) -> bool {
        selection.accepts_type(self.rel_type.0)
            && selection.direction.matches(node.0, self.start.0, self.end.0)
    }
}

pub(crate) struct StateView<'a> {
    pub(crate) engine: &'a StorageEngine,
    pub(crate) state: &'a TxState,
}

impl<'a> StateView<'a> {
    pub(crate) fn new(engine: &'a StorageEngine, state: &'a TxState) -> Self {
        Self { engine, state }
    }

    fn committed_node(&self, node: NodeId) -> Result<Option<NodeCursor<'a>>> {
        let mut cursor = NodeCursor::new(self.engine.stores());
        cursor.single(node);
        if cursor.next()? {
            Ok(Some(cursor))
        } else {
            cursor.close();
            Ok(None)
        }
    }

    pub(crate) fn node_exists(&self, node: NodeId) -> Result<bool> {
        if self.state.is_node_deleted(node) {
            return Ok(false);
        }
        if self.state.is_node_created(node) {
            return Ok(true);
        }
        self.engine.stores().nodes.is_in_use(node.0)
    }

    pub(crate) fn require_node(&self, node: NodeId) -> Result<()> {
        if self.node_exists(node)? {
            Ok(())
        } else {
            Err(PenumbraError::NotFound {
                kind: "node",
                id: node.0,
            })
        }
    }

    pub(crate) fn node_labels(&self, node: NodeId) -> Result<Vec<LabelId>> {
        self.require_node(node)?;
        let base = if self.state.is_node_created(node) {
            Vec::new()
        } else {
            match self.committed_node(node)? {
                Some(mut cursor) => {
                    let labels = cursor.labels()?;
                    cursor.close();
                    labels
                }
                None => Vec::new(),
            }
        };
        Ok(match self.state.node_state(node) {
            Some(state) => state.labels.apply(base),
            None => base,
        })
    }

    pub(crate) fn node_properties(&self, node: NodeId) -> Result<Vec<(PropertyKeyId, Value)>> {
        self.require_node(node)?;
        let mut base: Vec<(PropertyKeyId, Value)> = if self.state.is_node_created(node) {
            Vec::new()
        } else {
            match self.committed_node(node)? {
                Some(mut cursor) => {
                    let reference = cursor.properties_reference();
                    cursor.close();
                    read_properties(self.engine.stores(), reference)?
                        .into_iter()
                        .collect()
                }
                None => Vec::new(),
            }
        };
        base.sort_by_key(|(key, _)| *key);
        Ok(match self.state.node_state(node) {
            Some(state) => state.properties.merge(base),
            None => base,
        })
    }

    pub(crate) fn node_property(&self, node: NodeId, key: PropertyKeyId) -> Result<Option<Value>> {
        Ok(self
            .node_properties(node)?
            .into_iter()
            .find_map(|(existing, value)| (existing == key).then_some(value)))
    }

    pub(crate) fn relationship(&self, id: RelationshipId) -> Result<RelationshipView> {
        if let Some(created) = self.state.created_relationship(id) {
            return Ok(RelationshipView {
                id,
                rel_type: created.rel_type,
                start: created.start,
                end: created.end,
            });
        }
        let missing = PenumbraError::NotFound {
            kind: "relationship",
            id: id.0,
        };
        if self.state.is_relationship_deleted(id) {
            return Err(missing);
        }
        let mut cursor = RelationshipScanCursor::new(self.engine.stores());
        cursor.single(id);
        let found = cursor.next()?;
        let view = found.then(|| RelationshipView {
            id,
            rel_type: cursor.rel_type(),
            start: cursor.source(),
            end: cursor.target(),
        });
        cursor.close();
        view.ok_or(missing)
    }

    pub(crate) fn relationship_properties(
        &self,
        id: RelationshipId,
    ) -> Result<Vec<(PropertyKeyId, Value)>> {
        self.relationship(id)?;
        let mut base: Vec<(PropertyKeyId, Value)> = if self.state.is_relationship_created(id) {
            Vec::new()
        } else {
            let mut cursor = RelationshipScanCursor::new(self.engine.stores());
            cursor.single(id);
            let reference = if cursor.next()? {
                Some(cursor.properties_reference())
            } else {
                None
            };
            cursor.close();
            match reference {
                Some(reference) => read_properties(self.engine.stores(), reference)?
                    .into_iter()
                    .collect(),
                None => Vec::new(),
            }
        };
        base.sort_by_key(|(key, _)| *key);
        Ok(match self.state.relationship_properties(id) {
            Some(changes) => changes.merge(base),
            None => base,
        })
    }

    /// Whether the transaction added or removed relationships at `node`.
    fn has_relationship_changes(&self, node: NodeId) -> Result<bool> {
        if self.state.created_relationships_of(node).next().is_some() {
            return Ok(true);
        }
        let stores = self.engine.stores();
        for id in self.state.deleted_relationships() {
            let record = stores.relationships.load(id.0, RecordLoad::Force)?;
            if record.first_node == node.0 || record.second_node == node.0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Chain length of a sparse node, read from the count its head
    /// relationship carries.
    fn sparse_degree(&self, node: NodeId, head: u64) -> Result<u64> {
        if head == NULL_REFERENCE {
            return Ok(0);
        }
        let record = self.engine.stores().relationships.load(head, RecordLoad::Force)?;
        Ok(record.side_of(node.0).map_or(0, |side| record.prev(side)))
    }

    pub(crate) fn relationships(
        &self,
        node: NodeId,
        selection: &RelationshipSelection,
    ) -> Result<Vec<RelationshipView>> {
        self.require_node(node)?;
        let mut out = Vec::new();
        if !self.state.is_node_created(node) {
            if let Some(mut cursor) = self.committed_node(node)? {
                let buffered = !cursor.is_dense()
                    && self.has_relationship_changes(node)?
                    && self.sparse_degree(node, cursor.relationships_reference())?
                        <= self.engine.options().record_buffer_group_limit as u64;
                let mut traversal = RelationshipTraversalCursor::new(self.engine.stores());
                if buffered {
                    traversal.init_buffered(
                        node.0,
                        cursor.relationships_reference(),
                        false,
                        selection.clone(),
                    )?;
                } else {
                    cursor.relationships(&mut traversal, selection.clone());
                }
                cursor.close();
                while traversal.next()? {
                    let id = traversal.id();
                    if self.state.is_relationship_deleted(id) {
                        continue;
                    }
                    out.push(RelationshipView {
                        id,
                        rel_type: traversal.rel_type(),
                        start: traversal.source(),
                        end: traversal.target(),
                    });
                }
                traversal.close();
            }
        }
        for (id, created) in self.state.created_relationships_of(node) {
            let view = RelationshipView {
                id,
                rel_type: created.rel_type,
                start: created.start,
                end: created.end,
            };
            if view.selected(node, selection) {
                out.push(view);
            }
        }
        Ok(out)
    }

    /// Relationships of `node` matching `selection`. Untouched committed
    /// nodes are counted from their groups without visiting relationships.
    pub(crate) fn degree(&self, node: NodeId, selection: &RelationshipSelection) -> Result<u64> {
        self.require_node(node)?;
        if self.state.is_node_created(node) || self.has_relationship_changes(node)? {
            return Ok(self.relationships(node, selection)?.len() as u64);
        }
        let Some(mut cursor) = self.committed_node(node)? else {
            return Ok(0);
        };
        let mut groups = RelationshipGroupCursor::new(self.engine.stores());
        cursor.relationship_groups(&mut groups)?;
        cursor.close();
        let mut degree = 0;
        while groups.next()? {
            if !selection.accepts_type(groups.rel_type().0) {
                continue;
            }
            degree += match selection.direction {
                Direction::Outgoing => groups.outgoing_count()? + groups.loop_count()?,
                Direction::Incoming => groups.incoming_count()? + groups.loop_count()?,
                Direction::Both => groups.total_count()?,
            };
        }
        groups.close();
        Ok(degree)
    }

    pub(crate) fn nodes_with_label(&self, label: LabelId) -> Result<Vec<NodeId>> {
        let mut nodes: BTreeSet<NodeId> = self
            .engine
            .label_index()
            .nodes_with_label(label)
            .into_iter()
            .filter(|node| !self.state.is_node_deleted(*node))
            .collect();
        let touched: Vec<NodeId> = self
            .state
            .modified_nodes()
            .chain(self.state.created_nodes())
            .collect();
        for node in touched {
            if !self.node_exists(node)? {
                continue;
            }
            if self.node_labels(node)?.contains(&label) {
                nodes.insert(node);
            } else {
                nodes.remove(&node);
            }
        }
        Ok(nodes.into_iter().collect())
    }

    /// Every relationship visible to the transaction with type `rel_type`.
    pub(crate) fn relationships_of_type(&self, rel_type: RelTypeId) -> Result<Vec<RelationshipId>> {
        let mut out = Vec::new();
        let mut cursor = RelationshipScanCursor::new(self.engine.stores());
        cursor.scan();
        while cursor.next()? {
            if cursor.rel_type() == rel_type && !self.state.is_relationship_deleted(cursor.id()) {
                out.push(cursor.id());
            }
        }
        cursor.close();
        out.extend(
            self.state
                .created_relationships()
                .filter(|(_, rel)| rel.rel_type == rel_type)
                .map(|(id, _)| id),
        );
        Ok(out)
    }
}
