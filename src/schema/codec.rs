//! Binary form of schema rules as stored in the schema payload chain.

use crate::primitives::bytes::buf::{put_string, Reader};
use crate::types::{PenumbraError, PropertyKeyId, Result};

use super::{
    ConstraintDescriptor, ConstraintType, EntityType, IndexDescriptor, IndexProvider,
    SchemaDescriptor, SchemaRule,
};

const RULE_FORMAT: u8 = 1;
const KIND_INDEX: u8 = 1;
const KIND_CONSTRAINT: u8 = 2;

fn put_optional(out: &mut Vec<u8>, value: Option<u64>) {
    match value {
        Some(v) => {
            out.push(1);
            out.extend_from_slice(&v.to_be_bytes());
        }
        None => out.push(0),
    }
}

fn read_optional(reader: &mut Reader<'_>) -> Result<Option<u64>> {
    match reader.u8()? {
        0 => Ok(None),
        1 => Ok(Some(reader.u64()?)),
        _ => Err(PenumbraError::Corruption("invalid optional flag in schema rule")),
    }
}

fn put_schema(out: &mut Vec<u8>, schema: &SchemaDescriptor) {
    out.push(match schema.entity {
        EntityType::Node => 0,
        EntityType::Relationship => 1,
    });
    out.extend_from_slice(&schema.entity_token.to_be_bytes());
    out.extend_from_slice(&(schema.properties.len() as u32).to_be_bytes());
    for key in &schema.properties {
        out.extend_from_slice(&key.0.to_be_bytes());
    }
}

fn read_schema(reader: &mut Reader<'_>) -> Result<SchemaDescriptor> {
    let entity = match reader.u8()? {
        0 => EntityType::Node,
        1 => EntityType::Relationship,
        _ => return Err(PenumbraError::Corruption("unknown schema entity type")),
    };
    let entity_token = reader.u32()?;
    let count = reader.u32()? as usize;
    if count > reader.remaining() / 4 {
        return Err(PenumbraError::Corruption("schema property count exceeds payload"));
    }
    let properties = (0..count)
        .map(|_| reader.u32().map(PropertyKeyId))
        .collect::<Result<Vec<_>>>()?;
    Ok(SchemaDescriptor {
        entity,
        entity_token,
        properties,
    })
}

/// Serialises `rule`.
pub fn encode_rule(rule: &SchemaRule) -> Vec<u8> {
    let mut out = vec![RULE_FORMAT];
    match rule {
        SchemaRule::Index(index) => {
            out.push(KIND_INDEX);
            out.extend_from_slice(&index.id.to_be_bytes());
            put_string(&mut out, &index.name);
            put_schema(&mut out, &index.schema);
            put_string(&mut out, &index.provider.key);
            put_string(&mut out, &index.provider.version);
            out.push(index.unique as u8);
            put_optional(&mut out, index.owning_constraint);
        }
        SchemaRule::Constraint(constraint) => {
            out.push(KIND_CONSTRAINT);
            out.extend_from_slice(&constraint.id.to_be_bytes());
            put_string(&mut out, &constraint.name);
            put_schema(&mut out, &constraint.schema);
            out.push(match constraint.constraint_type {
                ConstraintType::Uniqueness => 0,
                ConstraintType::NodeKey => 1,
                ConstraintType::Existence => 2,
            });
            put_optional(&mut out, constraint.owned_index);
        }
    }
    out
}

/// Parses a rule written by [`encode_rule`].
pub fn decode_rule(bytes: &[u8]) -> Result<SchemaRule> {
    let mut reader = Reader::new(bytes);
    if reader.u8()? != RULE_FORMAT {
        return Err(PenumbraError::Corruption("unknown schema rule format"));
    }
    let kind = reader.u8()?;
    let id = reader.u64()?;
    let name = reader.string()?;
    let schema = read_schema(&mut reader)?;
    let rule = match kind {
        KIND_INDEX => {
            let provider = IndexProvider {
                key: reader.string()?,
                version: reader.string()?,
            };
            let unique = reader.u8()? != 0;
            SchemaRule::Index(IndexDescriptor {
                id,
                name,
                schema,
                provider,
                unique,
                owning_constraint: read_optional(&mut reader)?,
            })
        }
        KIND_CONSTRAINT => {
            let constraint_type = match reader.u8()? {
                0 => ConstraintType::Uniqueness,
                1 => ConstraintType::NodeKey,
                2 => ConstraintType::Existence,
                _ => return Err(PenumbraError::Corruption("unknown constraint type")),
            };
            SchemaRule::Constraint(ConstraintDescriptor {
                id,
                name,
                schema,
                constraint_type,
                owned_index: read_optional(&mut reader)?,
            })
        }
        _ => return Err(PenumbraError::Corruption("unknown schema rule kind")),
    };
    if !reader.is_empty() {
        return Err(PenumbraError::Corruption("trailing bytes after schema rule"));
    }
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LabelId, RelTypeId};

    #[test]
    fn rules_roundtrip() {
        let rules = [
            SchemaRule::Index(IndexDescriptor {
                id: 4,
                name: "person_name".into(),
                schema: SchemaDescriptor::for_label(LabelId(1), &[PropertyKeyId(2), PropertyKeyId(3)]),
                provider: IndexProvider::default(),
                unique: true,
                owning_constraint: Some(5),
            }),
            SchemaRule::Constraint(ConstraintDescriptor {
                id: 5,
                name: "since_exists".into(),
                schema: SchemaDescriptor::for_rel_type(RelTypeId(7), &[PropertyKeyId(1)]),
                constraint_type: ConstraintType::Existence,
                owned_index: None,
            }),
        ];
        for rule in rules {
            assert_eq!(decode_rule(&encode_rule(&rule)).unwrap(), rule);
        }
    }

    #[test]
    fn truncated_rule_is_corruption() {
        let rule = SchemaRule::Constraint(ConstraintDescriptor {
            id: 1,
            name: "c".into(),
            schema: SchemaDescriptor::for_label(LabelId(1), &[PropertyKeyId(1)]),
            constraint_type: ConstraintType::Uniqueness,
            owned_index: Some(2),
        });
        let bytes = encode_rule(&rule);
        assert!(decode_rule(&bytes[..bytes.len() - 3]).is_err());
    }
}
