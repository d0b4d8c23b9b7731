//! Schema rules: indexes and constraints.

mod cache;
mod codec;

pub use cache::{SchemaCache, SchemaSnapshot};
pub use codec::{decode_rule, encode_rule};

use std::fmt;

use crate::types::{LabelId, PenumbraError, PropertyKeyId, RelTypeId, Result};

/// Prefix of rule names reserved for internal use.
pub const RESERVED_NAME_PREFIX: &str = "__penumbra";

/// Kind of entity a schema applies to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    /// Nodes, keyed by label.
    Node,
    /// Relationships, keyed by type.
    Relationship,
}

/// The entity token and properties a rule covers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaDescriptor {
    /// Entity kind.
    pub entity: EntityType,
    /// Label or relationship type id.
    pub entity_token: u32,
    /// Covered property keys, in order.
    pub properties: Vec<PropertyKeyId>,
}

impl SchemaDescriptor {
    /// A node schema over `label`.
    pub fn for_label(label: LabelId, properties: &[PropertyKeyId]) -> Self {
        Self {
            entity: EntityType::Node,
            entity_token: label.0,
            properties: properties.to_vec(),
        }
    }

    /// A relationship schema over `rel_type`.
    pub fn for_rel_type(rel_type: RelTypeId, properties: &[PropertyKeyId]) -> Self {
        Self {
            entity: EntityType::Relationship,
            entity_token: rel_type.0,
            properties: properties.to_vec(),
        }
    }

    /// The label when this is a node schema.
    pub fn label(&self) -> Option<LabelId> {
        (self.entity == EntityType::Node).then_some(LabelId(self.entity_token))
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let props: Vec<String> = self.properties.iter().map(|p| p.0.to_string()).collect();
        match self.entity {
            EntityType::Node => write!(f, "(:{})[{}]", self.entity_token, props.join(",")),
            EntityType::Relationship => write!(f, "[:{}][{}]", self.entity_token, props.join(",")),
        }
    }
}

/// Index implementation a rule is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndexProvider {
    /// Provider key.
    pub key: String,
    /// Provider version.
    pub version: String,
}

impl Default for IndexProvider {
    fn default() -> Self {
        Self {
            key: "penumbra-native".into(),
            version: "1.0".into(),
        }
    }
}

/// A property index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDescriptor {
    /// Rule id.
    pub id: u64,
    /// Unique rule name.
    pub name: String,
    /// Indexed schema.
    pub schema: SchemaDescriptor,
    /// Backing implementation.
    pub provider: IndexProvider,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Constraint owning this index, if any.
    pub owning_constraint: Option<u64>,
}

/// Kinds of constraint.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintType {
    /// Property tuple is unique among entities with the token.
    Uniqueness,
    /// Properties exist and are unique.
    NodeKey,
    /// Properties exist.
    Existence,
}

impl ConstraintType {
    /// Whether the constraint needs a backing unique index.
    pub fn requires_index(self) -> bool {
        matches!(self, ConstraintType::Uniqueness | ConstraintType::NodeKey)
    }

    /// Whether the constraint requires the properties to exist.
    pub fn requires_existence(self) -> bool {
        matches!(self, ConstraintType::NodeKey | ConstraintType::Existence)
    }
}

/// A constraint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstraintDescriptor {
    /// Rule id.
    pub id: u64,
    /// Unique rule name.
    pub name: String,
    /// Constrained schema.
    pub schema: SchemaDescriptor,
    /// What is enforced.
    pub constraint_type: ConstraintType,
    /// Index backing a uniqueness or node key constraint.
    pub owned_index: Option<u64>,
}

/// A persisted schema rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaRule {
    /// A property index.
    Index(IndexDescriptor),
    /// A constraint.
    Constraint(ConstraintDescriptor),
}

impl SchemaRule {
    /// Rule id, equal to its schema record id.
    pub fn id(&self) -> u64 {
        match self {
            SchemaRule::Index(index) => index.id,
            SchemaRule::Constraint(constraint) => constraint.id,
        }
    }

    /// User-facing rule name.
    pub fn name(&self) -> &str {
        match self {
            SchemaRule::Index(index) => &index.name,
            SchemaRule::Constraint(constraint) => &constraint.name,
        }
    }

    /// The entities and keys the rule covers.
    pub fn schema(&self) -> &SchemaDescriptor {
        match self {
            SchemaRule::Index(index) => &index.schema,
            SchemaRule::Constraint(constraint) => &constraint.schema,
        }
    }

    /// Checks structural validity of a rule about to be created.
    pub fn validate_new(&self) -> Result<()> {
        if self.name().is_empty() {
            return Err(PenumbraError::ConstraintViolation(
                "schema rule name must not be empty".into(),
            ));
        }
        if self.name().starts_with(RESERVED_NAME_PREFIX) {
            return Err(PenumbraError::ConstraintViolation(format!(
                "schema rule name '{}' uses the reserved prefix {RESERVED_NAME_PREFIX}",
                self.name()
            )));
        }
        if self.schema().properties.is_empty() {
            return Err(PenumbraError::ConstraintViolation(format!(
                "schema rule '{}' covers no properties",
                self.name()
            )));
        }
        if let SchemaRule::Constraint(constraint) = self {
            if constraint.constraint_type == ConstraintType::NodeKey
                && constraint.schema.entity != EntityType::Node
            {
                return Err(PenumbraError::ConstraintViolation(
                    "node key constraints apply to nodes only".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names_are_rejected() {
        let rule = SchemaRule::Index(IndexDescriptor {
            id: 1,
            name: format!("{RESERVED_NAME_PREFIX}_x"),
            schema: SchemaDescriptor::for_label(LabelId(1), &[PropertyKeyId(2)]),
            provider: IndexProvider::default(),
            unique: false,
            owning_constraint: None,
        });
        assert!(matches!(
            rule.validate_new(),
            Err(PenumbraError::ConstraintViolation(_))
        ));
    }
}
