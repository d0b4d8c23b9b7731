//! Command wire formats.
//!
//! Every command starts with a tag byte. `V1` writes integers fixed width and
//! big-endian; `V2` and later write them as varints, with pointer fields
//! shifted by one so the null reference encodes as a single zero byte. `V3`
//! property commands also carry the owning entity.

use smallvec::SmallVec;

use crate::primitives::bytes::{buf::Reader, var};
use crate::schema::{decode_rule, encode_rule};
use crate::storage::record::{
    DynamicRecord, NodeRecord, PropertyBlock, PropertyOwner, PropertyRecord,
    RelationshipGroupRecord, RelationshipRecord, SchemaRecord, TokenRecord,
};
use crate::storage::TokenKind;
use crate::types::{KernelVersion, LabelId, PenumbraError, RelTypeId, Result};

use super::{Change, Command};

const TAG_NODE: u8 = 1;
const TAG_RELATIONSHIP: u8 = 2;
const TAG_GROUP: u8 = 3;
const TAG_PROPERTY: u8 = 4;
const TAG_SCHEMA: u8 = 5;
const TAG_TOKEN: u8 = 6;
const TAG_NODE_COUNT: u8 = 7;
const TAG_RELATIONSHIP_COUNT: u8 = 8;
const TAG_UPGRADE: u8 = 9;

const ANY_TOKEN: u64 = u32::MAX as u64;

struct Encoder {
    varint: bool,
    out: Vec<u8>,
}

impl Encoder {
    fn new(version: KernelVersion) -> Self {
        Self {
            varint: version >= KernelVersion::V2,
            out: Vec::with_capacity(64),
        }
    }

    fn u8(&mut self, v: u8) {
        self.out.push(v);
    }

    fn bool(&mut self, v: bool) {
        self.out.push(v as u8);
    }

    fn u32(&mut self, v: u32) {
        if self.varint {
            var::encode_u64(v as u64, &mut self.out);
        } else {
            self.out.extend_from_slice(&v.to_be_bytes());
        }
    }

    fn u64(&mut self, v: u64) {
        if self.varint {
            var::encode_u64(v, &mut self.out);
        } else {
            self.out.extend_from_slice(&v.to_be_bytes());
        }
    }

    fn i64(&mut self, v: i64) {
        if self.varint {
            var::encode_i64(v, &mut self.out);
        } else {
            self.out.extend_from_slice(&v.to_be_bytes());
        }
    }

    fn reference(&mut self, v: u64) {
        if self.varint {
            var::encode_u64(v.wrapping_add(1), &mut self.out);
        } else {
            self.out.extend_from_slice(&v.to_be_bytes());
        }
    }

    /// Raw words are bit patterns; varints would only grow them.
    fn word(&mut self, v: u64) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.out.extend_from_slice(v);
    }
}

struct Decoder<'a> {
    varint: bool,
    reader: Reader<'a>,
}

impl<'a> Decoder<'a> {
    fn new(version: KernelVersion, bytes: &'a [u8]) -> Self {
        Self {
            varint: version >= KernelVersion::V2,
            reader: Reader::new(bytes),
        }
    }

    fn u8(&mut self) -> Result<u8> {
        self.reader.u8()
    }

    fn bool(&mut self) -> Result<bool> {
        match self.reader.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(PenumbraError::Corruption("invalid boolean in command")),
        }
    }

    fn u32(&mut self) -> Result<u32> {
        if self.varint {
            u32::try_from(self.reader.var_u64()?)
                .map_err(|_| PenumbraError::Corruption("u32 field out of range in command"))
        } else {
            self.reader.u32()
        }
    }

    fn u64(&mut self) -> Result<u64> {
        if self.varint {
            self.reader.var_u64()
        } else {
            self.reader.u64()
        }
    }

    fn i64(&mut self) -> Result<i64> {
        if self.varint {
            self.reader.var_i64()
        } else {
            Ok(self.reader.u64()? as i64)
        }
    }

    fn reference(&mut self) -> Result<u64> {
        if self.varint {
            Ok(self.reader.var_u64()?.wrapping_sub(1))
        } else {
            self.reader.u64()
        }
    }

    fn word(&mut self) -> Result<u64> {
        self.reader.u64()
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.reader.take(len)
    }

    fn count(&mut self, min_item_len: usize) -> Result<usize> {
        let count = self.u32()? as usize;
        if count.saturating_mul(min_item_len) > self.reader.remaining() {
            return Err(PenumbraError::Corruption("command list length exceeds payload"));
        }
        Ok(count)
    }
}

fn put_dynamic_records(enc: &mut Encoder, records: &[DynamicRecord]) {
    enc.u32(records.len() as u32);
    for record in records {
        enc.reference(record.id);
        enc.bool(record.in_use);
        enc.bool(record.start);
        enc.reference(record.next);
        enc.bytes(&record.data);
    }
}

fn read_dynamic_records(dec: &mut Decoder<'_>) -> Result<Vec<DynamicRecord>> {
    let count = dec.count(5)?;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(DynamicRecord {
            id: dec.reference()?,
            in_use: dec.bool()?,
            start: dec.bool()?,
            next: dec.reference()?,
            data: dec.bytes()?.to_vec(),
        });
    }
    Ok(records)
}

fn put_node(enc: &mut Encoder, node: &NodeRecord) {
    enc.reference(node.id);
    enc.bool(node.in_use);
    enc.bool(node.dense);
    enc.reference(node.next_rel);
    enc.reference(node.next_prop);
    enc.word(node.labels);
    put_dynamic_records(enc, &node.dynamic_labels);
}

fn read_node(dec: &mut Decoder<'_>) -> Result<NodeRecord> {
    Ok(NodeRecord {
        id: dec.reference()?,
        in_use: dec.bool()?,
        dense: dec.bool()?,
        next_rel: dec.reference()?,
        next_prop: dec.reference()?,
        labels: dec.word()?,
        dynamic_labels: read_dynamic_records(dec)?,
    })
}

fn put_relationship(enc: &mut Encoder, rel: &RelationshipRecord) {
    enc.reference(rel.id);
    enc.bool(rel.in_use);
    enc.u32(rel.rel_type);
    enc.reference(rel.first_node);
    enc.reference(rel.second_node);
    enc.reference(rel.first_prev);
    enc.reference(rel.first_next);
    enc.reference(rel.second_prev);
    enc.reference(rel.second_next);
    enc.bool(rel.first_in_first_chain);
    enc.bool(rel.first_in_second_chain);
    enc.reference(rel.next_prop);
}

fn read_relationship(dec: &mut Decoder<'_>) -> Result<RelationshipRecord> {
    Ok(RelationshipRecord {
        id: dec.reference()?,
        in_use: dec.bool()?,
        rel_type: dec.u32()?,
        first_node: dec.reference()?,
        second_node: dec.reference()?,
        first_prev: dec.reference()?,
        first_next: dec.reference()?,
        second_prev: dec.reference()?,
        second_next: dec.reference()?,
        first_in_first_chain: dec.bool()?,
        first_in_second_chain: dec.bool()?,
        next_prop: dec.reference()?,
    })
}

fn put_group(enc: &mut Encoder, group: &RelationshipGroupRecord) {
    enc.reference(group.id);
    enc.bool(group.in_use);
    enc.u32(group.rel_type);
    enc.reference(group.next);
    enc.reference(group.first_out);
    enc.reference(group.first_in);
    enc.reference(group.first_loop);
    enc.reference(group.owning_node);
}

fn read_group(dec: &mut Decoder<'_>) -> Result<RelationshipGroupRecord> {
    Ok(RelationshipGroupRecord {
        id: dec.reference()?,
        in_use: dec.bool()?,
        rel_type: dec.u32()?,
        next: dec.reference()?,
        first_out: dec.reference()?,
        first_in: dec.reference()?,
        first_loop: dec.reference()?,
        owning_node: dec.reference()?,
    })
}

fn put_blocks(enc: &mut Encoder, blocks: &[PropertyBlock]) {
    enc.u32(blocks.len() as u32);
    for block in blocks {
        enc.u8(block.value_blocks.len() as u8);
        for word in &block.value_blocks {
            enc.word(*word);
        }
        put_dynamic_records(enc, &block.value_records);
    }
}

fn read_blocks(dec: &mut Decoder<'_>) -> Result<Vec<PropertyBlock>> {
    let count = dec.count(2)?;
    let mut blocks = Vec::with_capacity(count);
    for _ in 0..count {
        let words = dec.u8()? as usize;
        let mut value_blocks = SmallVec::new();
        for _ in 0..words {
            value_blocks.push(dec.word()?);
        }
        blocks.push(PropertyBlock {
            value_blocks,
            value_records: read_dynamic_records(dec)?,
        });
    }
    Ok(blocks)
}

fn put_property(enc: &mut Encoder, property: &PropertyRecord, with_owner: bool) {
    enc.reference(property.id);
    enc.bool(property.in_use);
    enc.reference(property.prev_prop);
    enc.reference(property.next_prop);
    put_blocks(enc, &property.blocks);
    put_blocks(enc, &property.removed_blocks);
    if with_owner {
        match property.owner {
            None => enc.u8(0),
            Some(PropertyOwner::Node(id)) => {
                enc.u8(1);
                enc.u64(id);
            }
            Some(PropertyOwner::Relationship(id)) => {
                enc.u8(2);
                enc.u64(id);
            }
        }
    }
}

fn read_property(dec: &mut Decoder<'_>, with_owner: bool) -> Result<PropertyRecord> {
    let id = dec.reference()?;
    let in_use = dec.bool()?;
    let prev_prop = dec.reference()?;
    let next_prop = dec.reference()?;
    let blocks = read_blocks(dec)?;
    let removed_blocks = read_blocks(dec)?;
    let owner = if with_owner {
        match dec.u8()? {
            0 => None,
            1 => Some(PropertyOwner::Node(dec.u64()?)),
            2 => Some(PropertyOwner::Relationship(dec.u64()?)),
            _ => return Err(PenumbraError::Corruption("unknown property owner kind")),
        }
    } else {
        None
    };
    Ok(PropertyRecord {
        id,
        in_use,
        prev_prop,
        next_prop,
        blocks,
        removed_blocks,
        owner,
    })
}

fn put_schema(enc: &mut Encoder, schema: &SchemaRecord) {
    enc.reference(schema.id);
    enc.bool(schema.in_use);
    enc.reference(schema.payload_id);
    put_dynamic_records(enc, &schema.payload_records);
}

fn read_schema(dec: &mut Decoder<'_>) -> Result<SchemaRecord> {
    Ok(SchemaRecord {
        id: dec.reference()?,
        in_use: dec.bool()?,
        payload_id: dec.reference()?,
        payload_records: read_dynamic_records(dec)?,
    })
}

fn put_token(enc: &mut Encoder, token: &TokenRecord) {
    enc.reference(token.id);
    enc.bool(token.in_use);
    enc.reference(token.name_id);
    put_dynamic_records(enc, &token.name_records);
}

fn read_token(dec: &mut Decoder<'_>) -> Result<TokenRecord> {
    Ok(TokenRecord {
        id: dec.reference()?,
        in_use: dec.bool()?,
        name_id: dec.reference()?,
        name_records: read_dynamic_records(dec)?,
    })
}

fn put_optional_token(enc: &mut Encoder, token: Option<u32>) {
    enc.u64(token.map(u64::from).unwrap_or(ANY_TOKEN));
}

fn read_optional_token(dec: &mut Decoder<'_>) -> Result<Option<u32>> {
    let raw = dec.u64()?;
    if raw == ANY_TOKEN {
        Ok(None)
    } else {
        u32::try_from(raw)
            .map(Some)
            .map_err(|_| PenumbraError::Corruption("count token out of range"))
    }
}

/// Serialises one command at `version`.
///
/// Fails when the command cannot be expressed at that version; only
/// [`KernelVersion::supports_upgrade_command`] versions carry upgrades.
pub fn serialize_command(command: &Command, version: KernelVersion) -> Result<Vec<u8>> {
    let mut enc = Encoder::new(version);
    match command {
        Command::Node(change) => {
            enc.u8(TAG_NODE);
            put_node(&mut enc, &change.before);
            put_node(&mut enc, &change.after);
        }
        Command::Relationship(change) => {
            enc.u8(TAG_RELATIONSHIP);
            put_relationship(&mut enc, &change.before);
            put_relationship(&mut enc, &change.after);
        }
        Command::RelationshipGroup(change) => {
            enc.u8(TAG_GROUP);
            put_group(&mut enc, &change.before);
            put_group(&mut enc, &change.after);
        }
        Command::Property(change) => {
            let with_owner = version >= KernelVersion::V3;
            enc.u8(TAG_PROPERTY);
            put_property(&mut enc, &change.before, with_owner);
            put_property(&mut enc, &change.after, with_owner);
        }
        Command::Schema { change, rule } => {
            enc.u8(TAG_SCHEMA);
            put_schema(&mut enc, &change.before);
            put_schema(&mut enc, &change.after);
            match rule {
                Some(rule) => {
                    enc.bool(true);
                    enc.bytes(&encode_rule(rule));
                }
                None => enc.bool(false),
            }
        }
        Command::Token { kind, change } => {
            enc.u8(TAG_TOKEN);
            enc.u8(kind.code());
            put_token(&mut enc, &change.before);
            put_token(&mut enc, &change.after);
        }
        Command::NodeCount { label, delta } => {
            enc.u8(TAG_NODE_COUNT);
            put_optional_token(&mut enc, label.map(|l| l.0));
            enc.i64(*delta);
        }
        Command::RelationshipCount { rel_type, delta } => {
            enc.u8(TAG_RELATIONSHIP_COUNT);
            put_optional_token(&mut enc, rel_type.map(|t| t.0));
            enc.i64(*delta);
        }
        Command::UpgradeKernelVersion { from, to } => {
            if !version.supports_upgrade_command() {
                return Err(PenumbraError::Invalid(
                    "kernel upgrade commands cannot be written at this kernel version",
                ));
            }
            enc.u8(TAG_UPGRADE);
            enc.u8(from.version());
            enc.u8(to.version());
        }
    }
    Ok(enc.out)
}

/// Serialises every command of a transaction at `version`.
pub fn serialize_commands(commands: &[Command], version: KernelVersion) -> Result<Vec<Vec<u8>>> {
    commands
        .iter()
        .map(|command| serialize_command(command, version))
        .collect()
}

pub(super) fn deserialize_command(bytes: &[u8], version: KernelVersion) -> Result<Command> {
    let mut dec = Decoder::new(version, bytes);
    let command = match dec.u8()? {
        TAG_NODE => Command::Node(Change::new(read_node(&mut dec)?, read_node(&mut dec)?)),
        TAG_RELATIONSHIP => Command::Relationship(Change::new(
            read_relationship(&mut dec)?,
            read_relationship(&mut dec)?,
        )),
        TAG_GROUP => {
            Command::RelationshipGroup(Change::new(read_group(&mut dec)?, read_group(&mut dec)?))
        }
        TAG_PROPERTY => {
            let with_owner = version >= KernelVersion::V3;
            Command::Property(Change::new(
                read_property(&mut dec, with_owner)?,
                read_property(&mut dec, with_owner)?,
            ))
        }
        TAG_SCHEMA => {
            let change = Change::new(read_schema(&mut dec)?, read_schema(&mut dec)?);
            let rule = if dec.bool()? {
                Some(decode_rule(dec.bytes()?)?)
            } else {
                None
            };
            Command::Schema { change, rule }
        }
        TAG_TOKEN => {
            let kind = TokenKind::from_code(dec.u8()?)?;
            Command::Token {
                kind,
                change: Change::new(read_token(&mut dec)?, read_token(&mut dec)?),
            }
        }
        TAG_NODE_COUNT => Command::NodeCount {
            label: read_optional_token(&mut dec)?.map(LabelId),
            delta: dec.i64()?,
        },
        TAG_RELATIONSHIP_COUNT => Command::RelationshipCount {
            rel_type: read_optional_token(&mut dec)?.map(RelTypeId),
            delta: dec.i64()?,
        },
        TAG_UPGRADE if version.supports_upgrade_command() => Command::UpgradeKernelVersion {
            from: KernelVersion::from_version(dec.u8()?)?,
            to: KernelVersion::from_version(dec.u8()?)?,
        },
        TAG_UPGRADE => {
            return Err(PenumbraError::Corruption(
                "kernel upgrade command in a transaction that cannot carry one",
            ))
        }
        _ => return Err(PenumbraError::Corruption("unknown command tag")),
    };
    if !dec.reader.is_empty() {
        return Err(PenumbraError::Corruption("trailing bytes after command"));
    }
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::Record;
    use crate::types::NULL_REFERENCE;

    fn relationship() -> RelationshipRecord {
        let mut rel = RelationshipRecord::new(12);
        rel.in_use = true;
        rel.rel_type = 3;
        rel.first_node = 1;
        rel.second_node = 2;
        rel.first_prev = 4;
        rel.first_in_second_chain = true;
        rel.second_prev = 1;
        rel
    }

    #[test]
    fn varint_commands_are_smaller_than_fixed_width() -> Result<()> {
        let command = Command::Relationship(Change::new(RelationshipRecord::new(12), relationship()));
        let fixed = serialize_command(&command, KernelVersion::V1)?;
        let varint = serialize_command(&command, KernelVersion::V2)?;
        assert!(varint.len() < fixed.len());
        assert_eq!(deserialize_command(&fixed, KernelVersion::V1)?, command);
        assert_eq!(deserialize_command(&varint, KernelVersion::V2)?, command);
        Ok(())
    }

    #[test]
    fn null_references_survive_varint_shift() -> Result<()> {
        let node = NodeRecord::new(0);
        assert_eq!(node.next_rel, NULL_REFERENCE);
        let command = Command::Node(Change::new(node.clone(), node));
        let bytes = serialize_command(&command, KernelVersion::V3)?;
        assert_eq!(deserialize_command(&bytes, KernelVersion::V3)?, command);
        Ok(())
    }

    #[test]
    fn upgrade_command_needs_v2() {
        let upgrade = Command::UpgradeKernelVersion {
            from: KernelVersion::V1,
            to: KernelVersion::V2,
        };
        assert!(serialize_command(&upgrade, KernelVersion::V1).is_err());
        let bytes = serialize_command(&upgrade, KernelVersion::V2).unwrap();
        assert!(deserialize_command(&bytes, KernelVersion::V1).is_err());
        assert_eq!(deserialize_command(&bytes, KernelVersion::V2).unwrap(), upgrade);
    }

    #[test]
    fn property_owner_is_only_kept_from_v3() -> Result<()> {
        let mut after = PropertyRecord::new(5);
        after.in_use = true;
        after.owner = Some(PropertyOwner::Relationship(9));
        let command = Command::Property(Change::new(PropertyRecord::new(5), after));

        let Command::Property(v2) = deserialize_command(&serialize_command(&command, KernelVersion::V2)?, KernelVersion::V2)? else {
            panic!("expected a property command");
        };
        assert_eq!(v2.after.owner, None);

        let Command::Property(v3) = deserialize_command(&serialize_command(&command, KernelVersion::V3)?, KernelVersion::V3)? else {
            panic!("expected a property command");
        };
        assert_eq!(v3.after.owner, Some(PropertyOwner::Relationship(9)));
        Ok(())
    }

    #[test]
    fn property_blocks_round_trip_at_every_version() -> Result<()> {
        let mut before = PropertyRecord::new(7);
        before.in_use = true;
        before.next_prop = 8;
        before.blocks.push(PropertyBlock {
            value_blocks: SmallVec::from_slice(&[0x1234_0005, 42]),
            value_records: Vec::new(),
        });
        let mut after = before.clone();
        after.blocks.push(PropertyBlock {
            value_blocks: SmallVec::from_slice(&[0x0002_000b, 3]),
            value_records: vec![DynamicRecord {
                id: 3,
                in_use: true,
                start: true,
                next: NULL_REFERENCE,
                data: b"a long string value".to_vec(),
            }],
        });
        after.removed_blocks.push(PropertyBlock {
            value_blocks: SmallVec::from_slice(&[0x0009_0001]),
            value_records: Vec::new(),
        });
        let command = Command::Property(Change::new(before, after));

        for version in KernelVersion::ALL {
            let bytes = serialize_command(&command, version)?;
            assert_eq!(deserialize_command(&bytes, version)?, command, "{version:?}");
        }
        Ok(())
    }

    #[test]
    fn counts_keep_the_any_token() -> Result<()> {
        for version in KernelVersion::ALL {
            let command = Command::NodeCount {
                label: None,
                delta: -3,
            };
            let bytes = serialize_command(&command, version)?;
            assert_eq!(deserialize_command(&bytes, version)?, command);
        }
        Ok(())
    }

    #[test]
    fn truncated_command_is_corruption() -> Result<()> {
        let command = Command::Relationship(Change::new(RelationshipRecord::new(12), relationship()));
        let bytes = serialize_command(&command, KernelVersion::V2)?;
        assert!(matches!(
            deserialize_command(&bytes[..bytes.len() - 2], KernelVersion::V2),
            Err(PenumbraError::Corruption(_))
        ));
        Ok(())
    }
}
