//! Per-transaction overlay of uncommitted changes.
//!
//! Reads merge the committed store with this overlay; commit walks it with a
//! [`TxStateVisitor`] to produce record changes.

mod diffsets;

pub use diffsets::DiffSets;

use std::collections::{BTreeMap, BTreeSet};

use crate::schema::SchemaRule;
use crate::storage::{TokenKind, Value};
use crate::types::{LabelId, NodeId, PropertyKeyId, RelTypeId, RelationshipId, Result};

/// Property changes of one entity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertyChanges {
    /// Keys set to a value, new or replaced.
    pub set: BTreeMap<PropertyKeyId, Value>,
    /// Keys removed.
    pub removed: BTreeSet<PropertyKeyId>,
}

impl PropertyChanges {
    /// Sets `key`, cancelling an earlier removal.
    pub fn set(&mut self, key: PropertyKeyId, value: Value) {
        self.removed.remove(&key);
        self.set.insert(key, value);
    }

    /// Removes `key`, cancelling an earlier set.
    pub fn remove(&mut self, key: PropertyKeyId) {
        self.set.remove(&key);
        self.removed.insert(key);
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.removed.is_empty()
    }

    /// Applies the changes to committed properties.
    pub fn merge(&self, base: Vec<(PropertyKeyId, Value)>) -> Vec<(PropertyKeyId, Value)> {
        let mut merged: BTreeMap<PropertyKeyId, Value> = base
            .into_iter()
            .filter(|(key, _)| !self.removed.contains(key))
            .collect();
        for (key, value) in &self.set {
            merged.insert(*key, value.clone());
        }
        merged.into_iter().collect()
    }
}

/// Label and property changes of one node.
#[derive(Clone, Debug, Default)]
pub struct NodeState {
    /// Label changes.
    pub labels: DiffSets<LabelId>,
    /// Property changes.
    pub properties: PropertyChanges,
}

/// Endpoints and type of a relationship created in the transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CreatedRelationship {
    /// Relationship type.
    pub rel_type: RelTypeId,
    /// Start node.
    pub start: NodeId,
    /// End node.
    pub end: NodeId,
}

/// Receives the changes of a transaction in commit order.
pub trait TxStateVisitor {
    /// A token created by this transaction. Ignored by default.
    fn visit_created_token(&mut self, _kind: TokenKind, _id: u32, _name: &str) -> Result<()> {
        Ok(())
    }

    /// A node created by this transaction.
    fn visit_created_node(&mut self, id: NodeId) -> Result<()>;

    /// A committed relationship deleted by this transaction.
    fn visit_deleted_relationship(&mut self, id: RelationshipId) -> Result<()>;

    /// A relationship created by this transaction.
    fn visit_created_relationship(
        &mut self,
        id: RelationshipId,
        relationship: CreatedRelationship,
    ) -> Result<()>;

    /// A committed node deleted by this transaction.
    fn visit_deleted_node(&mut self, id: NodeId) -> Result<()>;

    /// Property changes on a node.
    fn visit_node_property_changes(&mut self, id: NodeId, changes: &PropertyChanges) -> Result<()>;

    /// Property changes on a relationship.
    fn visit_relationship_property_changes(
        &mut self,
        id: RelationshipId,
        changes: &PropertyChanges,
    ) -> Result<()>;

    /// Labels added to and removed from a node.
    fn visit_node_label_changes(
        &mut self,
        id: NodeId,
        added: &[LabelId],
        removed: &[LabelId],
    ) -> Result<()>;

    /// A schema rule dropped by this transaction.
    fn visit_removed_schema_rule(&mut self, rule: &SchemaRule) -> Result<()>;

    /// A schema rule created by this transaction.
    fn visit_added_schema_rule(&mut self, rule: &SchemaRule) -> Result<()>;
}

/// Everything a transaction changed but has not committed.
#[derive(Clone, Debug, Default)]
pub struct TxState {
    nodes: DiffSets<NodeId>,
    relationships: DiffSets<RelationshipId>,
    created_relationships: BTreeMap<RelationshipId, CreatedRelationship>,
    node_states: BTreeMap<NodeId, NodeState>,
    relationship_properties: BTreeMap<RelationshipId, PropertyChanges>,
    created_tokens: Vec<(TokenKind, u32, String)>,
    added_rules: BTreeMap<u64, SchemaRule>,
    removed_rules: BTreeMap<u64, SchemaRule>,
}

impl TxState {
    /// Whether anything changed.
    pub fn has_changes(&self) -> bool {
        self.has_data_changes()
            || !self.created_tokens.is_empty()
            || !self.added_rules.is_empty()
            || !self.removed_rules.is_empty()
    }

    /// Whether any node, relationship, label or property changed.
    pub fn has_data_changes(&self) -> bool {
        !self.nodes.is_empty()
            || !self.relationships.is_empty()
            || self
                .node_states
                .values()
                .any(|s| !s.labels.is_empty() || !s.properties.is_empty())
            || self.relationship_properties.values().any(|p| !p.is_empty())
    }

    /// Records a node created with `id`.
    pub fn node_do_create(&mut self, id: NodeId) {
        self.nodes.add(id);
    }

    /// Deletes a node. A node created in this transaction simply disappears.
    pub fn node_do_delete(&mut self, id: NodeId) {
        if self.nodes.is_added(id) {
            self.nodes.forget(id);
        } else {
            self.nodes.remove(id);
        }
        self.node_states.remove(&id);
    }

    /// Whether this transaction created `id`.
    pub fn is_node_created(&self, id: NodeId) -> bool {
        self.nodes.is_added(id)
    }

    /// Whether this transaction deleted committed node `id`.
    pub fn is_node_deleted(&self, id: NodeId) -> bool {
        self.nodes.is_removed(id)
    }

    /// Nodes created here, in id order.
    pub fn created_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.added()
    }

    /// Committed nodes deleted here, in id order.
    pub fn deleted_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.removed()
    }

    /// Records a relationship created with `id`.
    pub fn relationship_do_create(&mut self, id: RelationshipId, relationship: CreatedRelationship) {
        self.relationships.add(id);
        self.created_relationships.insert(id, relationship);
    }

    /// Deletes a relationship. One created in this transaction simply disappears.
    pub fn relationship_do_delete(&mut self, id: RelationshipId) {
        if self.created_relationships.remove(&id).is_some() {
            self.relationships.forget(id);
        } else {
            self.relationships.remove(id);
        }
        self.relationship_properties.remove(&id);
    }

    /// Whether this transaction created `id`.
    pub fn is_relationship_created(&self, id: RelationshipId) -> bool {
        self.created_relationships.contains_key(&id)
    }

    /// Whether this transaction deleted committed relationship `id`.
    pub fn is_relationship_deleted(&self, id: RelationshipId) -> bool {
        self.relationships.is_removed(id)
    }

    /// Endpoints and type of a relationship created here.
    pub fn created_relationship(&self, id: RelationshipId) -> Option<CreatedRelationship> {
        self.created_relationships.get(&id).copied()
    }

    /// Relationships created here, in id order.
    pub fn created_relationships(
        &self,
    ) -> impl Iterator<Item = (RelationshipId, CreatedRelationship)> + '_ {
        self.created_relationships.iter().map(|(id, rel)| (*id, *rel))
    }

    /// Relationships created in this transaction with `node` as an endpoint.
    pub fn created_relationships_of(
        &self,
        node: NodeId,
    ) -> impl Iterator<Item = (RelationshipId, CreatedRelationship)> + '_ {
        self.created_relationships
            .iter()
            .filter(move |(_, rel)| rel.start == node || rel.end == node)
            .map(|(id, rel)| (*id, *rel))
    }

    /// Committed relationships deleted here, in id order.
    pub fn deleted_relationships(&self) -> impl Iterator<Item = RelationshipId> + '_ {
        self.relationships.removed()
    }

    fn node_state_mut(&mut self, id: NodeId) -> &mut NodeState {
        self.node_states.entry(id).or_default()
    }

    /// Label and property changes of `id`.
    pub fn node_state(&self, id: NodeId) -> Option<&NodeState> {
        self.node_states.get(&id)
    }

    /// Nodes with label or property changes.
    pub fn modified_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_states.keys().copied()
    }

    /// Adds `label` to node `id`.
    pub fn node_add_label(&mut self, id: NodeId, label: LabelId) {
        self.node_state_mut(id).labels.add(label);
    }

    /// Removes `label` from node `id`.
    pub fn node_remove_label(&mut self, id: NodeId, label: LabelId) {
        self.node_state_mut(id).labels.remove(label);
    }

    /// Sets a node property.
    pub fn node_set_property(&mut self, id: NodeId, key: PropertyKeyId, value: Value) {
        self.node_state_mut(id).properties.set(key, value);
    }

    /// Removes a node property.
    pub fn node_remove_property(&mut self, id: NodeId, key: PropertyKeyId) {
        self.node_state_mut(id).properties.remove(key);
    }

    /// Sets a relationship property.
    pub fn relationship_set_property(&mut self, id: RelationshipId, key: PropertyKeyId, value: Value) {
        self.relationship_properties.entry(id).or_default().set(key, value);
    }

    /// Removes a relationship property.
    pub fn relationship_remove_property(&mut self, id: RelationshipId, key: PropertyKeyId) {
        self.relationship_properties.entry(id).or_default().remove(key);
    }

    /// Relationships with property changes.
    pub fn modified_relationships(&self) -> impl Iterator<Item = RelationshipId> + '_ {
        self.relationship_properties.keys().copied()
    }

    /// Property changes of relationship `id`.
    pub fn relationship_properties(&self, id: RelationshipId) -> Option<&PropertyChanges> {
        self.relationship_properties.get(&id)
    }

    /// Records a token created while this transaction ran.
    pub fn token_do_create(&mut self, kind: TokenKind, id: u32, name: &str) {
        self.created_tokens.push((kind, id, name.to_owned()));
    }

    /// Adds a schema rule.
    pub fn schema_rule_do_add(&mut self, rule: SchemaRule) {
        self.added_rules.insert(rule.id(), rule);
    }

    /// Drops a rule. Dropping one added in this transaction cancels the add.
    pub fn schema_rule_do_drop(&mut self, rule: SchemaRule) {
        if self.added_rules.remove(&rule.id()).is_none() {
            self.removed_rules.insert(rule.id(), rule);
        }
    }

    /// Rules added here, in id order.
    pub fn added_schema_rules(&self) -> impl Iterator<Item = &SchemaRule> + '_ {
        self.added_rules.values()
    }

    /// Whether committed rule `id` is dropped here.
    pub fn is_schema_rule_dropped(&self, id: u64) -> bool {
        self.removed_rules.contains_key(&id)
    }

    /// Walks every change in commit order: tokens, created nodes, deleted
    /// relationships, created relationships, deleted nodes, property changes,
    /// label changes, then schema.
    pub fn accept(&self, visitor: &mut dyn TxStateVisitor) -> Result<()> {
        for (kind, id, name) in &self.created_tokens {
            visitor.visit_created_token(*kind, *id, name)?;
        }
        for id in self.nodes.added() {
            visitor.visit_created_node(id)?;
        }
        for id in self.relationships.removed() {
            visitor.visit_deleted_relationship(id)?;
        }
        for (id, relationship) in &self.created_relationships {
            visitor.visit_created_relationship(*id, *relationship)?;
        }
        for id in self.nodes.removed() {
            visitor.visit_deleted_node(id)?;
        }
        for (id, state) in &self.node_states {
            if !state.properties.is_empty() {
                visitor.visit_node_property_changes(*id, &state.properties)?;
            }
        }
        for (id, changes) in &self.relationship_properties {
            if !changes.is_empty() {
                visitor.visit_relationship_property_changes(*id, changes)?;
            }
        }
        for (id, state) in &self.node_states {
            if !state.labels.is_empty() {
                let added: Vec<LabelId> = state.labels.added().collect();
                let removed: Vec<LabelId> = state.labels.removed().collect();
                visitor.visit_node_label_changes(*id, &added, &removed)?;
            }
        }
        for rule in self.removed_rules.values() {
            visitor.visit_removed_schema_rule(rule)?;
        }
        for rule in self.added_rules.values() {
            visitor.visit_added_schema_rule(rule)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl TxStateVisitor for Recorder {
        fn visit_created_token(&mut self, kind: TokenKind, id: u32, name: &str) -> Result<()> {
            self.0.push(format!("token {kind:?} {id} {name}"));
            Ok(())
        }
        fn visit_created_node(&mut self, id: NodeId) -> Result<()> {
            self.0.push(format!("create {id}"));
            Ok(())
        }
        fn visit_deleted_relationship(&mut self, id: RelationshipId) -> Result<()> {
            self.0.push(format!("delete {id}"));
            Ok(())
        }
        fn visit_created_relationship(&mut self, id: RelationshipId, _: CreatedRelationship) -> Result<()> {
            self.0.push(format!("create {id}"));
            Ok(())
        }
        fn visit_deleted_node(&mut self, id: NodeId) -> Result<()> {
            self.0.push(format!("delete {id}"));
            Ok(())
        }
        fn visit_node_property_changes(&mut self, id: NodeId, c: &PropertyChanges) -> Result<()> {
            self.0.push(format!("props {id} {}", c.set.len()));
            Ok(())
        }
        fn visit_relationship_property_changes(&mut self, id: RelationshipId, c: &PropertyChanges) -> Result<()> {
            self.0.push(format!("props {id} {}", c.set.len()));
            Ok(())
        }
        fn visit_node_label_changes(&mut self, id: NodeId, added: &[LabelId], removed: &[LabelId]) -> Result<()> {
            self.0.push(format!("labels {id} +{} -{}", added.len(), removed.len()));
            Ok(())
        }
        fn visit_removed_schema_rule(&mut self, rule: &SchemaRule) -> Result<()> {
            self.0.push(format!("drop {}", rule.id()));
            Ok(())
        }
        fn visit_added_schema_rule(&mut self, rule: &SchemaRule) -> Result<()> {
            self.0.push(format!("add {}", rule.id()));
            Ok(())
        }
    }

    #[test]
    fn visits_in_commit_order() {
        let mut state = TxState::default();
        state.node_set_property(NodeId(1), PropertyKeyId(1), Value::Int(1));
        state.node_do_delete(NodeId(2));
        state.relationship_do_create(
            RelationshipId(5),
            CreatedRelationship {
                rel_type: RelTypeId(0),
                start: NodeId(1),
                end: NodeId(3),
            },
        );
        state.relationship_do_delete(RelationshipId(4));
        state.node_do_create(NodeId(3));
        state.node_add_label(NodeId(3), LabelId(1));
        state.token_do_create(TokenKind::Label, 1, "Person");
        let mut recorder = Recorder::default();
        state.accept(&mut recorder).unwrap();
        assert_eq!(
            recorder.0,
            vec![
                "token Label 1 Person",
                "create node#3",
                "delete relationship#4",
                "create relationship#5",
                "delete node#2",
                "props node#1 1",
                "labels node#3 +1 -0",
            ]
        );
    }

    #[test]
    fn deleting_created_entities_leaves_no_trace() {
        let mut state = TxState::default();
        state.node_do_create(NodeId(1));
        state.node_add_label(NodeId(1), LabelId(2));
        state.node_do_delete(NodeId(1));
        state.relationship_do_create(
            RelationshipId(1),
            CreatedRelationship {
                rel_type: RelTypeId(0),
                start: NodeId(0),
                end: NodeId(0),
            },
        );
        state.relationship_do_delete(RelationshipId(1));
        assert!(!state.has_changes());
    }
}
