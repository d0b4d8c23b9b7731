use std::sync::Arc;

use crate::storage::{IdGenerator, IdSequence, RecordStores, RenewableBatchIdSequence};
use crate::types::{NodeId, RelationshipId};

/// Per-transaction id batches for every store a transaction can allocate from.
///
/// Ids are pulled from the shared generators in renewable batches; whatever
/// is left unused goes back when the context closes or drops.
pub struct CommandCreationContext {
    pub(crate) nodes: RenewableBatchIdSequence,
    pub(crate) relationships: RenewableBatchIdSequence,
    pub(crate) groups: RenewableBatchIdSequence,
    pub(crate) properties: RenewableBatchIdSequence,
    pub(crate) strings: RenewableBatchIdSequence,
    pub(crate) arrays: RenewableBatchIdSequence,
    pub(crate) node_labels: RenewableBatchIdSequence,
    pub(crate) token_names: RenewableBatchIdSequence,
    pub(crate) schema_payloads: RenewableBatchIdSequence,
    node_ids: Arc<IdGenerator>,
    relationship_ids: Arc<IdGenerator>,
    schema: Arc<IdGenerator>,
}

impl CommandCreationContext {
    pub(crate) fn new(stores: &RecordStores, batch_size: usize) -> Self {
        let batch = |ids: &Arc<IdGenerator>| RenewableBatchIdSequence::new(Arc::clone(ids), batch_size);
        Self {
            nodes: batch(stores.nodes.ids()),
            relationships: batch(stores.relationships.ids()),
            groups: batch(stores.groups.ids()),
            properties: batch(stores.properties.ids()),
            strings: batch(stores.strings.records().ids()),
            arrays: batch(stores.arrays.records().ids()),
            node_labels: batch(stores.node_labels.records().ids()),
            token_names: batch(stores.token_names.records().ids()),
            schema_payloads: batch(stores.schema_payloads.records().ids()),
            node_ids: Arc::clone(stores.nodes.ids()),
            relationship_ids: Arc::clone(stores.relationships.ids()),
            schema: Arc::clone(stores.schema.ids()),
        }
    }

    /// Allocates a node id from this context's batch.
    pub fn reserve_node(&mut self) -> NodeId {
        NodeId(self.nodes.next_id())
    }

    /// Allocates a relationship id from this context's batch.
    pub fn reserve_relationship(&mut self) -> RelationshipId {
        RelationshipId(self.relationships.next_id())
    }

    /// Returns the id of a node that will never be committed.
    pub fn release_node(&mut self, id: NodeId) {
        self.node_ids.free_id(id.0);
    }

    /// Returns the id of a relationship that will never be committed.
    pub fn release_relationship(&mut self, id: RelationshipId) {
        self.relationship_ids.free_id(id.0);
    }

    /// Schema rule ids double as schema record ids and are never batched.
    pub fn reserve_schema_rule_id(&mut self) -> u64 {
        self.schema.next_id()
    }

    /// Returns a schema rule id reserved by a transaction that did not commit it.
    pub fn release_schema_rule_id(&mut self, id: u64) {
        self.schema.free_id(id);
    }

    /// Returns every unused id to its generator.
    pub fn close(&mut self) {
        self.nodes.close();
        self.relationships.close();
        self.groups.close();
        self.properties.close();
        self.strings.close();
        self.arrays.close();
        self.node_labels.close();
        self.token_names.close();
        self.schema_payloads.close();
    }
}
