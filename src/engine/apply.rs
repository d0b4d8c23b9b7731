//! The batch-applier chain.
//!
//! Every transaction of a batch runs through the appliers in order: store,
//! high id (recovery only), cache invalidation, counts and index updates.
//! A transaction is applied under a lock group over the nodes it touches,
//! released before the next transaction of the batch starts.

use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::command::Command;
use crate::schema::{EntityType, IndexDescriptor, SchemaCache, SchemaRule};
use crate::storage::cursor::{NodeCursor, PropertyCursor};
use crate::storage::index::{IndexUpdate, LabelScanIndex, LabelUpdate, PropertyIndexes};
use crate::storage::labels;
use crate::storage::record::{
    DynamicRecord, PropertyBlock, PropertyOwner, PropertyType, Record, RecordLoad,
    RelationshipRecord,
};
use crate::storage::{
    concat, CountsStore, DynamicStore, RecordStore, RecordStores, TokenHolders, Value,
};
use crate::types::{LabelId, NodeId, PenumbraError, PropertyKeyId, Result};

use super::metrics::EngineMetrics;
use super::{ApplyMode, CommandsToApply};

const LOCK_STRIPES: usize = 64;

/// Striped locks serializing concurrent applies that touch the same nodes.
pub(crate) struct ApplyLocks {
    stripes: Vec<Arc<Mutex<()>>>,
}

impl Default for ApplyLocks {
    fn default() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }
}

/// Locks held while one transaction is applied.
pub(crate) struct LockGroup {
    _guards: Vec<ArcMutexGuard<RawMutex, ()>>,
}

impl ApplyLocks {
    /// Locks the stripes of every node `tx` touches, in stripe order.
    pub(crate) fn lock_group(&self, tx: &CommandsToApply) -> LockGroup {
        let mut stripes: Vec<usize> = Vec::new();
        let mut add = |node: u64| stripes.push((node % LOCK_STRIPES as u64) as usize);
        for command in &tx.commands {
            match command {
                Command::Node(change) => add(change.after.id),
                Command::Relationship(change) => {
                    add(change.after.first_node);
                    add(change.after.second_node);
                }
                Command::RelationshipGroup(change) => add(change.after.owning_node),
                _ => {}
            }
        }
        stripes.sort_unstable();
        stripes.dedup();
        LockGroup {
            _guards: stripes.into_iter().map(|i| self.stripes[i].lock_arc()).collect(),
        }
    }
}

/// One stage of the chain.
pub(crate) trait BatchApplier {
    /// Runs before any stage applies `tx`, against the pre-transaction stores.
    fn prepare(&mut self, _tx: &CommandsToApply) -> Result<()> {
        Ok(())
    }

    fn apply(&mut self, tx: &CommandsToApply) -> Result<()>;
}

fn dynamic_store_for<'s>(stores: &'s RecordStores, block: &PropertyBlock) -> &'s DynamicStore {
    match block.property_type() {
        Some(PropertyType::Array) => &stores.arrays,
        _ => &stores.strings,
    }
}

fn write_record<R: Record>(store: &RecordStore<R>, record: &R) -> Result<()> {
    store.update_record(record)?;
    if !record.in_use() {
        store.ids().free_id(record.id());
    }
    Ok(())
}

fn write_dynamic(store: &DynamicStore, records: &[DynamicRecord]) -> Result<()> {
    store.write_records(records)?;
    for record in records.iter().filter(|r| !r.in_use) {
        store.records().ids().free_id(record.id);
    }
    Ok(())
}

/// Writes after images to the stores, dynamic records before their owner.
pub(crate) struct StoreApplier<'e> {
    pub(crate) stores: &'e RecordStores,
    pub(crate) metrics: &'e dyn EngineMetrics,
}

impl BatchApplier for StoreApplier<'_> {
    fn apply(&mut self, tx: &CommandsToApply) -> Result<()> {
        let stores = self.stores;
        for command in &tx.commands {
            match command {
                Command::Node(change) => {
                    write_dynamic(&stores.node_labels, &change.after.dynamic_labels)?;
                    write_record(&stores.nodes, &change.after)?;
                    match (change.before.in_use, change.after.in_use) {
                        (false, true) => self.metrics.node_created(),
                        (true, false) => self.metrics.node_deleted(),
                        _ => {}
                    }
                }
                Command::Relationship(change) => {
                    write_record(&stores.relationships, &change.after)?;
                    match (change.before.in_use, change.after.in_use) {
                        (false, true) => self.metrics.relationship_created(),
                        (true, false) => self.metrics.relationship_deleted(),
                        _ => {}
                    }
                }
                Command::RelationshipGroup(change) => {
                    write_record(&stores.groups, &change.after)?;
                }
                Command::Property(change) => {
                    for block in change.after.blocks.iter().chain(&change.after.removed_blocks) {
                        write_dynamic(dynamic_store_for(stores, block), &block.value_records)?;
                    }
                    write_record(&stores.properties, &change.after)?;
                }
                Command::Schema { change, .. } => {
                    write_dynamic(&stores.schema_payloads, &change.after.payload_records)?;
                    write_record(&stores.schema, &change.after)?;
                }
                Command::Token { kind, change } => {
                    write_dynamic(&stores.token_names, &change.after.name_records)?;
                    write_record(stores.token_store(*kind), &change.after)?;
                }
                Command::UpgradeKernelVersion { to, .. } => {
                    stores.meta.set_kernel_version(*to)?;
                }
                Command::NodeCount { .. } | Command::RelationshipCount { .. } => {}
            }
        }
        stores.meta.advance_last_committed_tx(tx.tx_id)?;
        Ok(())
    }
}

fn mark_used<R: Record>(store: &RecordStore<R>, record: &R) {
    if record.in_use() {
        store.ids().mark_used(record.id());
    }
}

fn mark_dynamic_used(store: &DynamicStore, records: &[DynamicRecord]) {
    for record in records.iter().filter(|r| r.in_use) {
        store.records().ids().mark_used(record.id);
    }
}

/// Keeps id generators ahead of replayed records during recovery.
pub(crate) struct HighIdApplier<'e> {
    pub(crate) stores: &'e RecordStores,
}

impl BatchApplier for HighIdApplier<'_> {
    fn apply(&mut self, tx: &CommandsToApply) -> Result<()> {
        let stores = self.stores;
        for command in &tx.commands {
            match command {
                Command::Node(change) => {
                    mark_dynamic_used(&stores.node_labels, &change.after.dynamic_labels);
                    mark_used(&stores.nodes, &change.after);
                }
                Command::Relationship(change) => mark_used(&stores.relationships, &change.after),
                Command::RelationshipGroup(change) => mark_used(&stores.groups, &change.after),
                Command::Property(change) => {
                    for block in &change.after.blocks {
                        mark_dynamic_used(dynamic_store_for(stores, block), &block.value_records);
                    }
                    mark_used(&stores.properties, &change.after);
                }
                Command::Schema { change, .. } => {
                    mark_dynamic_used(&stores.schema_payloads, &change.after.payload_records);
                    mark_used(&stores.schema, &change.after);
                }
                Command::Token { kind, change } => {
                    mark_dynamic_used(&stores.token_names, &change.after.name_records);
                    mark_used(stores.token_store(*kind), &change.after);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Keeps the schema cache and token holders in step with the stores.
pub(crate) struct CacheInvalidationApplier<'e> {
    pub(crate) schema: &'e SchemaCache,
    pub(crate) tokens: &'e TokenHolders,
}

impl BatchApplier for CacheInvalidationApplier<'_> {
    fn apply(&mut self, tx: &CommandsToApply) -> Result<()> {
        for command in &tx.commands {
            match command {
                Command::Schema { change, rule } => match rule {
                    Some(rule) if change.after.in_use => self.schema.add_schema_rule(rule.clone()),
                    _ => self.schema.remove_schema_rule(change.after.id),
                },
                Command::Token { kind, change } if change.after.in_use => {
                    let name = String::from_utf8(concat(&change.after.name_records))
                        .map_err(|_| PenumbraError::Corruption("token name is not utf-8"))?;
                    self.tokens.add(*kind, change.after.id as u32, &name);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Applies count deltas. During recovery, transactions the counts store
/// already reflects are skipped.
pub(crate) struct CountsApplier<'e> {
    pub(crate) counts: &'e CountsStore,
    pub(crate) mode: ApplyMode,
}

impl BatchApplier for CountsApplier<'_> {
    fn apply(&mut self, tx: &CommandsToApply) -> Result<()> {
        if self.mode == ApplyMode::Recovery && self.counts.tx_id() >= tx.tx_id {
            return Ok(());
        }
        for command in &tx.commands {
            match command {
                Command::NodeCount { label, delta } => {
                    self.counts.increment_node_count(*label, *delta)
                }
                Command::RelationshipCount { rel_type, delta } => {
                    self.counts.increment_relationship_count(*rel_type, *delta)
                }
                _ => {}
            }
        }
        self.counts.set_tx_id(tx.tx_id);
        Ok(())
    }
}

/// Derives label scan and property index updates from the record changes,
/// reading the entities back from the stores once they are written.
pub(crate) struct IndexApplier<'e> {
    pub(crate) stores: &'e RecordStores,
    pub(crate) schema: &'e SchemaCache,
    pub(crate) label_index: &'e LabelScanIndex,
    pub(crate) property_indexes: &'e PropertyIndexes,
    labels_before: FxHashMap<u64, Vec<LabelId>>,
}

impl<'e> IndexApplier<'e> {
    pub(crate) fn new(
        stores: &'e RecordStores,
        schema: &'e SchemaCache,
        label_index: &'e LabelScanIndex,
        property_indexes: &'e PropertyIndexes,
    ) -> Self {
        Self {
            stores,
            schema,
            label_index,
            property_indexes,
            labels_before: FxHashMap::default(),
        }
    }
}

impl BatchApplier for IndexApplier<'_> {
    fn prepare(&mut self, tx: &CommandsToApply) -> Result<()> {
        self.labels_before.clear();
        for command in &tx.commands {
            if let Command::Node(change) = command {
                let labels = if change.before.in_use {
                    labels::node_labels(&change.before, &self.stores.node_labels)?
                } else {
                    Vec::new()
                };
                self.labels_before.insert(change.before.id, labels);
            }
        }
        Ok(())
    }

    fn apply(&mut self, tx: &CommandsToApply) -> Result<()> {
        let stores = self.stores;
        let mut nodes = FxHashSet::default();
        let mut relationships = FxHashSet::default();
        for command in &tx.commands {
            match command {
                Command::Node(change) => {
                    nodes.insert(change.after.id);
                }
                Command::Relationship(change) => {
                    relationships.insert(change.after.id);
                }
                Command::Property(change) => match change.after.owner {
                    Some(PropertyOwner::Node(id)) => {
                        nodes.insert(id);
                    }
                    Some(PropertyOwner::Relationship(id)) => {
                        relationships.insert(id);
                    }
                    None => {}
                },
                _ => {}
            }
        }

        let mut label_updates = Vec::new();
        for node in &nodes {
            if let Some(before) = self.labels_before.remove(node) {
                let after = node_labels_now(stores, *node)?;
                if before != after {
                    label_updates.push(LabelUpdate {
                        node: NodeId(*node),
                        before,
                        after,
                    });
                }
            }
        }
        self.label_index.apply(&label_updates);

        for command in &tx.commands {
            if let Command::Schema { change, rule } = command {
                match rule {
                    Some(SchemaRule::Index(index)) if change.after.in_use => {
                        self.property_indexes.create(index);
                        populate_index(stores, self.label_index, self.property_indexes, index)?;
                    }
                    _ if !change.after.in_use => self.property_indexes.drop_index(change.after.id),
                    _ => {}
                }
            }
        }

        let snapshot = self.schema.snapshot();
        let indexes: Vec<&IndexDescriptor> = snapshot.indexes().collect();
        if indexes.is_empty() {
            return Ok(());
        }
        let mut updates = Vec::new();
        for node in nodes {
            updates.extend(node_index_updates(stores, &indexes, node)?);
        }
        for relationship in relationships {
            updates.extend(relationship_index_updates(stores, &indexes, relationship)?);
        }
        trace!(tx = %tx.tx_id, updates = updates.len(), "apply.index_updates");
        self.property_indexes.apply(&updates);
        Ok(())
    }
}

fn node_labels_now(stores: &RecordStores, node: u64) -> Result<Vec<LabelId>> {
    let mut cursor = NodeCursor::new(stores);
    cursor.single(NodeId(node));
    let labels = if cursor.next()? { cursor.labels()? } else { Vec::new() };
    cursor.close();
    Ok(labels)
}

/// Reads the whole property chain at `reference`.
pub(crate) fn read_properties(
    stores: &RecordStores,
    reference: u64,
) -> Result<FxHashMap<PropertyKeyId, Value>> {
    let mut cursor = PropertyCursor::new(stores);
    cursor.init(reference);
    let mut out = FxHashMap::default();
    while cursor.next()? {
        if let (Some(key), Some(value)) = (cursor.property_key(), cursor.value()?) {
            out.insert(key, value);
        }
    }
    cursor.close();
    Ok(out)
}

fn indexed_values(
    index: &IndexDescriptor,
    properties: &FxHashMap<PropertyKeyId, Value>,
) -> Option<Vec<Value>> {
    index
        .schema
        .properties
        .iter()
        .map(|key| properties.get(key).cloned())
        .collect()
}

/// Index entries of `node` as it is now in the stores.
pub(crate) fn node_index_updates(
    stores: &RecordStores,
    indexes: &[&IndexDescriptor],
    node: u64,
) -> Result<Vec<IndexUpdate>> {
    let mut cursor = NodeCursor::new(stores);
    cursor.single(NodeId(node));
    let (labels, properties) = if cursor.next()? {
        (cursor.labels()?, read_properties(stores, cursor.properties_reference())?)
    } else {
        (Vec::new(), FxHashMap::default())
    };
    cursor.close();
    Ok(indexes
        .iter()
        .filter(|index| index.schema.entity == EntityType::Node)
        .map(|index| IndexUpdate {
            index_id: index.id,
            entity: node,
            after: labels
                .contains(&LabelId(index.schema.entity_token))
                .then(|| indexed_values(index, &properties))
                .flatten(),
        })
        .collect())
}

/// Index entries of `relationship` as it is now in the stores.
pub(crate) fn relationship_index_updates(
    stores: &RecordStores,
    indexes: &[&IndexDescriptor],
    relationship: u64,
) -> Result<Vec<IndexUpdate>> {
    let mut record = RelationshipRecord::new(relationship);
    stores
        .relationships
        .get_record(relationship, &mut record, RecordLoad::Check)?;
    let properties = if record.in_use {
        read_properties(stores, record.next_prop)?
    } else {
        FxHashMap::default()
    };
    Ok(indexes
        .iter()
        .filter(|index| index.schema.entity == EntityType::Relationship)
        .map(|index| IndexUpdate {
            index_id: index.id,
            entity: relationship,
            after: (record.in_use && record.rel_type == index.schema.entity_token)
                .then(|| indexed_values(index, &properties))
                .flatten(),
        })
        .collect())
}

/// Fills a freshly created index from the stores.
pub(crate) fn populate_index(
    stores: &RecordStores,
    label_index: &LabelScanIndex,
    property_indexes: &PropertyIndexes,
    index: &IndexDescriptor,
) -> Result<()> {
    let mut updates = Vec::new();
    match index.schema.entity {
        EntityType::Node => {
            for node in label_index.nodes_with_label(LabelId(index.schema.entity_token)) {
                updates.extend(node_index_updates(stores, &[index], node.0)?);
            }
        }
        EntityType::Relationship => {
            for id in 0..stores.relationships.high_id() {
                updates.extend(relationship_index_updates(stores, &[index], id)?);
            }
        }
    }
    updates.retain(|update| update.after.is_some());
    trace!(index = index.id, entries = updates.len(), "apply.index_populated");
    property_indexes.apply(&updates);
    Ok(())
}
