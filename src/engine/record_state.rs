//! Record-level delta of one transaction.
//!
//! Every record a transaction touches is loaded once into a [`RecordChanges`]
//! map holding its before image and a mutable after image. Extracting the
//! commands drops records whose after image equals the before image.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::command::{Change, Command};
use crate::schema::{encode_rule, SchemaRule};
use crate::storage::labels;
use crate::storage::record::{
    NodeRecord, PropertyOwner, PropertyRecord, Record, RecordLoad, RelationshipGroupRecord, RelationshipRecord,
    SchemaRecord, TokenRecord,
};
use crate::storage::{RecordStore, RecordStores, TokenKind};
use crate::types::{LabelId, PenumbraError, RelTypeId, Result, NULL_REFERENCE};

use super::context::CommandCreationContext;

/// Before and after images of the records of one store.
#[derive(Debug)]
pub(crate) struct RecordChanges<R: Record + PartialEq> {
    changes: BTreeMap<u64, (R, R)>,
}

impl<R: Record + PartialEq> Default for RecordChanges<R> {
    fn default() -> Self {
        Self {
            changes: BTreeMap::new(),
        }
    }
}

impl<R: Record + PartialEq> RecordChanges<R> {
    /// The after image of `id`, loading it from `store` on first access. The
    /// record must be in use.
    pub(crate) fn load(&mut self, id: u64, store: &RecordStore<R>) -> Result<&mut R> {
        let slot = match self.changes.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let record = store.load(id, RecordLoad::Normal)?;
                entry.insert((record.clone(), record))
            }
        };
        Ok(&mut slot.1)
    }

    /// Starts a new in-use record whose before image is unused.
    pub(crate) fn create(&mut self, id: u64) -> &mut R {
        let mut after = R::new(id);
        after.set_in_use(true);
        let slot = self.changes.entry(id).or_insert_with(|| (R::new(id), R::new(id)));
        slot.1 = after;
        &mut slot.1
    }

    pub(crate) fn get(&self, id: u64) -> Option<&R> {
        self.changes.get(&id).map(|(_, after)| after)
    }

    pub(crate) fn len(&self) -> usize {
        self.changes.len()
    }

    fn into_changes(self) -> impl Iterator<Item = Change<R>> {
        self.changes
            .into_values()
            .filter(|(before, after)| before != after)
            .map(|(before, after)| Change::new(before, after))
    }
}

/// Everything one transaction changes, at record level.
pub(crate) struct TransactionRecordState<'a> {
    pub(super) stores: &'a RecordStores,
    pub(super) ids: &'a mut CommandCreationContext,
    pub(super) dense_node_threshold: u64,
    pub(super) nodes: RecordChanges<NodeRecord>,
    pub(super) relationships: RecordChanges<RelationshipRecord>,
    pub(super) groups: RecordChanges<RelationshipGroupRecord>,
    pub(super) properties: RecordChanges<PropertyRecord>,
    schema: BTreeMap<u64, (Change<SchemaRecord>, Option<SchemaRule>)>,
    tokens: Vec<(TokenKind, Change<TokenRecord>)>,
    node_counts: BTreeMap<Option<LabelId>, i64>,
    relationship_counts: BTreeMap<Option<RelTypeId>, i64>,
    pub(super) dense_conversions: usize,
}

impl<'a> TransactionRecordState<'a> {
    pub(crate) fn new(
        stores: &'a RecordStores,
        ids: &'a mut CommandCreationContext,
        dense_node_threshold: u64,
    ) -> Self {
        Self {
            stores,
            ids,
            dense_node_threshold,
            nodes: RecordChanges::default(),
            relationships: RecordChanges::default(),
            groups: RecordChanges::default(),
            properties: RecordChanges::default(),
            schema: BTreeMap::new(),
            tokens: Vec::new(),
            node_counts: BTreeMap::new(),
            relationship_counts: BTreeMap::new(),
            dense_conversions: 0,
        }
    }

    pub(super) fn node_mut(&mut self, id: u64) -> Result<&mut NodeRecord> {
        self.nodes.load(id, &self.stores.nodes)
    }

    pub(super) fn relationship_mut(&mut self, id: u64) -> Result<&mut RelationshipRecord> {
        self.relationships.load(id, &self.stores.relationships)
    }

    pub(super) fn group_mut(&mut self, id: u64) -> Result<&mut RelationshipGroupRecord> {
        self.groups.load(id, &self.stores.groups)
    }

    pub(super) fn count_nodes(&mut self, label: Option<LabelId>, delta: i64) {
        *self.node_counts.entry(label).or_default() += delta;
    }

    pub(super) fn count_relationships(&mut self, rel_type: Option<RelTypeId>, delta: i64) {
        *self.relationship_counts.entry(rel_type).or_default() += delta;
    }

    pub(crate) fn node_create(&mut self, id: u64) {
        self.nodes.create(id);
        self.count_nodes(None, 1);
    }

    /// Deletes a node whose relationships are already gone.
    pub(crate) fn node_delete(&mut self, id: u64) -> Result<()> {
        let stores = self.stores;
        let node = self.nodes.load(id, &stores.nodes)?;
        if node.next_rel != NULL_REFERENCE {
            return Err(PenumbraError::ConstraintViolation(format!(
                "node {id} cannot be deleted because it still has relationships"
            )));
        }
        let current = labels::node_labels(node, &stores.node_labels)?;
        if labels::is_dynamic(node.labels) && !node.dynamic_labels.iter().any(|r| r.in_use) {
            node.dynamic_labels = stores
                .node_labels
                .load_chain(labels::dynamic_pointer(node.labels))?;
        }
        for record in &mut node.dynamic_labels {
            record.in_use = false;
        }
        node.in_use = false;
        let properties = node.next_prop;
        for label in current {
            self.count_nodes(Some(label), -1);
        }
        self.count_nodes(None, -1);
        self.delete_property_chain(PropertyOwner::Node(id), properties)
    }

    pub(crate) fn node_change_labels(
        &mut self,
        id: u64,
        added: &[LabelId],
        removed: &[LabelId],
    ) -> Result<()> {
        let stores = self.stores;
        let node = self.nodes.load(id, &stores.nodes)?;
        let current = labels::node_labels(node, &stores.node_labels)?;
        let mut next: Vec<LabelId> = current
            .iter()
            .copied()
            .filter(|label| !removed.contains(label))
            .collect();
        next.extend(added.iter().copied().filter(|label| !current.contains(label)));
        labels::set_node_labels(node, &next, &stores.node_labels, &mut self.ids.node_labels)?;
        for label in added.iter().filter(|label| !current.contains(label)) {
            self.count_nodes(Some(*label), 1);
        }
        for label in removed.iter().filter(|label| current.contains(label)) {
            self.count_nodes(Some(*label), -1);
        }
        Ok(())
    }

    pub(crate) fn token_create(&mut self, kind: TokenKind, id: u32, name: &str) {
        let records = self
            .stores
            .token_names
            .allocate_records(name.as_bytes(), &mut self.ids.token_names);
        let mut after = TokenRecord::new(id as u64);
        after.in_use = true;
        after.name_id = records[0].id;
        after.name_records = records;
        self.tokens
            .push((kind, Change::new(TokenRecord::new(id as u64), after)));
    }

    pub(crate) fn schema_rule_create(&mut self, rule: &SchemaRule) {
        let id = rule.id();
        let records = self
            .stores
            .schema_payloads
            .allocate_records(&encode_rule(rule), &mut self.ids.schema_payloads);
        let mut after = SchemaRecord::new(id);
        after.in_use = true;
        after.payload_id = records[0].id;
        after.payload_records = records;
        self.schema.insert(
            id,
            (Change::new(SchemaRecord::new(id), after), Some(rule.clone())),
        );
    }

    pub(crate) fn schema_rule_drop(&mut self, rule: &SchemaRule) -> Result<()> {
        let id = rule.id();
        let before = self.stores.schema.load(id, RecordLoad::Normal)?;
        let mut after = before.clone();
        after.payload_records = self.stores.schema_payloads.load_chain(before.payload_id)?;
        for record in &mut after.payload_records {
            record.in_use = false;
        }
        after.in_use = false;
        self.schema.insert(id, (Change::new(before, after), None));
        Ok(())
    }

    /// Number of records touched so far.
    pub(crate) fn touched_records(&self) -> usize {
        self.nodes.len() + self.relationships.len() + self.groups.len() + self.properties.len()
    }

    /// Turns the delta into commands. Records are ordered so that a record is
    /// written before anything created in the same transaction points at it.
    pub(crate) fn extract_commands(self) -> Vec<Command> {
        let mut commands = Vec::new();
        for (kind, change) in self.tokens {
            commands.push(Command::Token { kind, change });
        }
        commands.extend(self.properties.into_changes().map(Command::Property));
        commands.extend(self.relationships.into_changes().map(Command::Relationship));
        commands.extend(self.groups.into_changes().map(Command::RelationshipGroup));
        commands.extend(self.nodes.into_changes().map(Command::Node));
        for (_, (change, rule)) in self.schema {
            commands.push(Command::Schema { change, rule });
        }
        for (label, delta) in self.node_counts {
            if delta != 0 {
                commands.push(Command::NodeCount { label, delta });
            }
        }
        for (rel_type, delta) in self.relationship_counts {
            if delta != 0 {
                commands.push(Command::RelationshipCount { rel_type, delta });
            }
        }
        commands
    }
}
