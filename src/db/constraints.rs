//! Constraint checks against the state a transaction would commit.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::engine::StorageEngine;
use crate::schema::{ConstraintDescriptor, EntityType, SchemaRule};
use crate::storage::index::composite_key;
use crate::storage::Value;
use crate::txstate::TxState;
use crate::types::{LabelId, NodeId, PenumbraError, PropertyKeyId, RelTypeId, RelationshipId, Result};

use super::view::StateView;

/// Fails with [`PenumbraError::ConstraintViolation`] when the post-commit
/// state would break a constraint.
///
/// Constraints added by the transaction are checked against every entity
/// they cover. Existing constraints are checked against the entities the
/// transaction touched, plus committed holders of the same unique values.
pub(crate) fn validate(engine: &StorageEngine, state: &TxState) -> Result<()> {
    let snapshot = engine.schema().snapshot();
    let view = StateView::new(engine, state);

    let added: Vec<&ConstraintDescriptor> = state
        .added_schema_rules()
        .filter_map(|rule| match rule {
            SchemaRule::Constraint(constraint) => Some(constraint),
            SchemaRule::Index(_) => None,
        })
        .collect();
    for constraint in &added {
        let candidates = covered_entities(&view, constraint)?;
        let all: BTreeSet<u64> = candidates.iter().copied().collect();
        check(&view, constraint, &candidates, &all, None)?;
    }

    let existing: Vec<&ConstraintDescriptor> = snapshot
        .constraints()
        .filter(|constraint| !state.is_schema_rule_dropped(constraint.id))
        .collect();
    if existing.is_empty() || !state.has_data_changes() {
        return Ok(());
    }
    let nodes: BTreeSet<u64> = state
        .created_nodes()
        .chain(state.modified_nodes())
        .map(|node| node.0)
        .collect();
    let relationships: BTreeSet<u64> = state
        .created_relationships()
        .map(|(id, _)| id)
        .chain(state.modified_relationships())
        .map(|id| id.0)
        .collect();
    for constraint in existing {
        let touched = match constraint.schema.entity {
            EntityType::Node => &nodes,
            EntityType::Relationship => &relationships,
        };
        let candidates: Vec<u64> = touched.iter().copied().collect();
        check(&view, constraint, &candidates, touched, constraint.owned_index)?;
    }
    debug!(constraints = snapshot.constraints().count(), "constraints.validated");
    Ok(())
}

fn covered_entities(view: &StateView<'_>, constraint: &ConstraintDescriptor) -> Result<Vec<u64>> {
    let token = constraint.schema.entity_token;
    Ok(match constraint.schema.entity {
        EntityType::Node => view
            .nodes_with_label(LabelId(token))?
            .into_iter()
            .map(|node| node.0)
            .collect(),
        EntityType::Relationship => view
            .relationships_of_type(RelTypeId(token))?
            .into_iter()
            .map(|id| id.0)
            .collect(),
    })
}

/// Properties of `entity` when it exists and carries the constrained token.
fn constrained_properties(
    view: &StateView<'_>,
    constraint: &ConstraintDescriptor,
    entity: u64,
) -> Result<Option<FxHashMap<PropertyKeyId, Value>>> {
    let token = constraint.schema.entity_token;
    match constraint.schema.entity {
        EntityType::Node => {
            let node = NodeId(entity);
            if !view.node_exists(node)? || !view.node_labels(node)?.contains(&LabelId(token)) {
                return Ok(None);
            }
            Ok(Some(view.node_properties(node)?.into_iter().collect()))
        }
        EntityType::Relationship => {
            let id = RelationshipId(entity);
            match view.relationship(id) {
                Ok(relationship) if relationship.rel_type == RelTypeId(token) => {
                    Ok(Some(view.relationship_properties(id)?.into_iter().collect()))
                }
                Ok(_) | Err(PenumbraError::NotFound { .. }) => Ok(None),
                Err(err) => Err(err),
            }
        }
    }
}

fn is_deleted(view: &StateView<'_>, entity_type: EntityType, entity: u64) -> bool {
    match entity_type {
        EntityType::Node => view.state.is_node_deleted(NodeId(entity)),
        EntityType::Relationship => view.state.is_relationship_deleted(RelationshipId(entity)),
    }
}

fn describe(entity_type: EntityType, entity: u64) -> String {
    match entity_type {
        EntityType::Node => NodeId(entity).to_string(),
        EntityType::Relationship => RelationshipId(entity).to_string(),
    }
}

fn check(
    view: &StateView<'_>,
    constraint: &ConstraintDescriptor,
    candidates: &[u64],
    touched: &BTreeSet<u64>,
    committed_index: Option<u64>,
) -> Result<()> {
    let entity_type = constraint.schema.entity;
    let mut seen: FxHashMap<Vec<u8>, u64> = FxHashMap::default();
    for &entity in candidates {
        let Some(properties) = constrained_properties(view, constraint, entity)? else {
            continue;
        };
        let values: Option<Vec<Value>> = constraint
            .schema
            .properties
            .iter()
            .map(|key| properties.get(key).cloned())
            .collect();
        let Some(values) = values else {
            if constraint.constraint_type.requires_existence() {
                return Err(PenumbraError::ConstraintViolation(format!(
                    "constraint '{}': {} lacks a property of {}",
                    constraint.name,
                    describe(entity_type, entity),
                    constraint.schema
                )));
            }
            continue;
        };
        if !constraint.constraint_type.requires_index() {
            continue;
        }
        if let Some(other) = seen.insert(composite_key(&values), entity) {
            return Err(duplicate(constraint, entity, other));
        }
        if let Some(index) = committed_index {
            let holder = view
                .engine
                .property_indexes()
                .lookup(index, &values)
                .into_iter()
                .find(|holder| {
                    *holder != entity
                        && !touched.contains(holder)
                        && !is_deleted(view, entity_type, *holder)
                });
            if let Some(holder) = holder {
                return Err(duplicate(constraint, entity, holder));
            }
        }
    }
    Ok(())
}

fn duplicate(constraint: &ConstraintDescriptor, entity: u64, other: u64) -> PenumbraError {
    let entity_type = constraint.schema.entity;
    PenumbraError::ConstraintViolation(format!(
        "constraint '{}': {} has the same values for {} as {}",
        constraint.name,
        describe(entity_type, entity),
        constraint.schema,
        describe(entity_type, other)
    ))
}
