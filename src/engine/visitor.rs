use crate::schema::SchemaRule;
use crate::storage::record::PropertyOwner;
use crate::storage::TokenKind;
use crate::txstate::{CreatedRelationship, PropertyChanges, TxStateVisitor};
use crate::types::{LabelId, NodeId, RelationshipId, Result};

use super::record_state::TransactionRecordState;

/// Replays a transaction state onto its record-level delta.
pub(super) struct CommandVisitor<'s, 'a> {
    pub(super) state: &'s mut TransactionRecordState<'a>,
}

impl CommandVisitor<'_, '_> {
    fn apply_properties(&mut self, owner: PropertyOwner, changes: &PropertyChanges) -> Result<()> {
        for key in &changes.removed {
            self.state.property_remove(owner, *key)?;
        }
        for (key, value) in &changes.set {
            self.state.property_set(owner, *key, value)?;
        }
        Ok(())
    }
}

impl TxStateVisitor for CommandVisitor<'_, '_> {
    fn visit_created_token(&mut self, kind: TokenKind, id: u32, name: &str) -> Result<()> {
        self.state.token_create(kind, id, name);
        Ok(())
    }

    fn visit_created_node(&mut self, id: NodeId) -> Result<()> {
        self.state.node_create(id.0);
        Ok(())
    }

    fn visit_deleted_relationship(&mut self, id: RelationshipId) -> Result<()> {
        self.state.relationship_delete(id.0)
    }

    fn visit_created_relationship(
        &mut self,
        id: RelationshipId,
        relationship: CreatedRelationship,
    ) -> Result<()> {
        self.state.relationship_create(
            id.0,
            relationship.rel_type.0,
            relationship.start.0,
            relationship.end.0,
        )
    }

    fn visit_deleted_node(&mut self, id: NodeId) -> Result<()> {
        self.state.node_delete(id.0)
    }

    fn visit_node_property_changes(&mut self, id: NodeId, changes: &PropertyChanges) -> Result<()> {
        self.apply_properties(PropertyOwner::Node(id.0), changes)
    }

    fn visit_relationship_property_changes(
        &mut self,
        id: RelationshipId,
        changes: &PropertyChanges,
    ) -> Result<()> {
        self.apply_properties(PropertyOwner::Relationship(id.0), changes)
    }

    fn visit_node_label_changes(
        &mut self,
        id: NodeId,
        added: &[LabelId],
        removed: &[LabelId],
    ) -> Result<()> {
        self.state.node_change_labels(id.0, added, removed)
    }

    fn visit_removed_schema_rule(&mut self, rule: &SchemaRule) -> Result<()> {
        self.state.schema_rule_drop(rule)
    }

    fn visit_added_schema_rule(&mut self, rule: &SchemaRule) -> Result<()> {
        self.state.schema_rule_create(rule);
        Ok(())
    }
}
