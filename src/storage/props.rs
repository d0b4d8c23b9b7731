//! Encoding of property values into property blocks.
//!
//! A block's header word packs the type (4 bits), the property key (24 bits)
//! and a 36 bit payload. Small values live entirely in the payload; larger
//! ones take up to three extra words; strings and arrays that do not fit are
//! moved to a dynamic record chain and the payload points at its first record.

use smallvec::SmallVec;

use crate::primitives::bytes::buf::{put_string, Reader};
use crate::types::{PenumbraError, PropertyKeyId, Result};

use super::dynamic::{concat, DynamicStore};
use super::ids::IdSequence;
use super::record::{PropertyBlock, PropertyType};
use super::values::{ArrayValue, Crs, Point, TemporalValue, Value};

const MAX_KEY: u32 = 0xFF_FFFF;
const PAYLOAD_BITS: u32 = 36;
const SHORT_STRING_MAX: usize = 24;
const SHORT_ARRAY_MAX_BYTES: usize = 24;
const INLINE_LONG_MIN: i64 = -(1 << 34);
const INLINE_LONG_MAX: i64 = (1 << 34) - 1;

fn header(kind: PropertyType, key: PropertyKeyId, payload: u64) -> u64 {
    (payload << 28) | (((key.0 & MAX_KEY) as u64) << 4) | kind as u64
}

fn block(words: &[u64]) -> PropertyBlock {
    PropertyBlock {
        value_blocks: SmallVec::from_slice(words),
        value_records: Vec::new(),
    }
}

fn pack_words(bytes: &[u8]) -> SmallVec<[u64; 3]> {
    bytes
        .chunks(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw[..chunk.len()].copy_from_slice(chunk);
            u64::from_be_bytes(raw)
        })
        .collect()
}

fn unpack_words(words: &[u64], len: usize) -> Vec<u8> {
    let mut out: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    out.truncate(len);
    out
}

fn array_tag(array: &ArrayValue) -> u8 {
    match array {
        ArrayValue::Bool(_) => 1,
        ArrayValue::Byte(_) => 2,
        ArrayValue::Short(_) => 3,
        ArrayValue::Char(_) => 4,
        ArrayValue::Int(_) => 5,
        ArrayValue::Long(_) => 6,
        ArrayValue::Float(_) => 7,
        ArrayValue::Double(_) => 8,
        ArrayValue::String(_) => 9,
    }
}

fn encode_elements(array: &ArrayValue, out: &mut Vec<u8>) {
    match array {
        ArrayValue::Bool(v) => out.extend(v.iter().map(|b| *b as u8)),
        ArrayValue::Byte(v) => out.extend(v.iter().map(|b| *b as u8)),
        ArrayValue::Short(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
        ArrayValue::Char(v) => v
            .iter()
            .for_each(|c| out.extend_from_slice(&(*c as u32).to_be_bytes())),
        ArrayValue::Int(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
        ArrayValue::Long(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
        ArrayValue::Float(v) => v
            .iter()
            .for_each(|x| out.extend_from_slice(&x.to_bits().to_be_bytes())),
        ArrayValue::Double(v) => v
            .iter()
            .for_each(|x| out.extend_from_slice(&x.to_bits().to_be_bytes())),
        ArrayValue::String(v) => v.iter().for_each(|s| put_string(out, s)),
    }
}

fn decode_elements(tag: u8, count: usize, reader: &mut Reader<'_>) -> Result<ArrayValue> {
    fn collect<T>(count: usize, mut f: impl FnMut() -> Result<T>) -> Result<Vec<T>> {
        (0..count).map(|_| f()).collect()
    }
    Ok(match tag {
        1 => ArrayValue::Bool(collect(count, || Ok(reader.u8()? != 0))?),
        2 => ArrayValue::Byte(collect(count, || Ok(reader.u8()? as i8))?),
        3 => ArrayValue::Short(collect(count, || Ok(reader.u16()? as i16))?),
        4 => ArrayValue::Char(collect(count, || {
            char::from_u32(reader.u32()?).ok_or(PenumbraError::Corruption("invalid char in array"))
        })?),
        5 => ArrayValue::Int(collect(count, || Ok(reader.u32()? as i32))?),
        6 => ArrayValue::Long(collect(count, || Ok(reader.u64()? as i64))?),
        7 => ArrayValue::Float(collect(count, || Ok(f32::from_bits(reader.u32()?)))?),
        8 => ArrayValue::Double(collect(count, || Ok(f64::from_bits(reader.u64()?)))?),
        9 => ArrayValue::String(collect(count, || reader.string())?),
        _ => return Err(PenumbraError::Corruption("unknown array element type")),
    })
}

fn short_array_bytes(array: &ArrayValue) -> Option<Vec<u8>> {
    if matches!(array, ArrayValue::String(_)) || array.len() > 0xFF {
        return None;
    }
    let mut bytes = Vec::new();
    encode_elements(array, &mut bytes);
    (bytes.len() <= SHORT_ARRAY_MAX_BYTES).then_some(bytes)
}

fn dynamic_pointer(first: u64) -> Result<u64> {
    if first >> PAYLOAD_BITS != 0 {
        return Err(PenumbraError::Invalid("dynamic record id exceeds 36 bits"));
    }
    Ok(first)
}

/// Encodes `value` as a block for `key`, allocating dynamic records through
/// the given stores and id sequences when the value is too large to inline.
pub fn encode_value(
    key: PropertyKeyId,
    value: &Value,
    strings: &DynamicStore,
    string_ids: &mut dyn IdSequence,
    arrays: &DynamicStore,
    array_ids: &mut dyn IdSequence,
) -> Result<PropertyBlock> {
    if key.0 > MAX_KEY {
        return Err(PenumbraError::Invalid("property key id exceeds 24 bits"));
    }
    Ok(match value {
        Value::Bool(v) => block(&[header(PropertyType::Bool, key, *v as u64)]),
        Value::Byte(v) => block(&[header(PropertyType::Byte, key, *v as u8 as u64)]),
        Value::Short(v) => block(&[header(PropertyType::Short, key, *v as u16 as u64)]),
        Value::Char(v) => block(&[header(PropertyType::Char, key, *v as u32 as u64)]),
        Value::Int(v) => block(&[header(PropertyType::Int, key, *v as u32 as u64)]),
        Value::Float(v) => block(&[header(PropertyType::Float, key, v.to_bits() as u64)]),
        Value::Long(v) => {
            if (INLINE_LONG_MIN..=INLINE_LONG_MAX).contains(v) {
                let payload = ((*v as u64 & ((1 << 35) - 1)) << 1) | 1;
                block(&[header(PropertyType::Long, key, payload)])
            } else {
                block(&[header(PropertyType::Long, key, 0), *v as u64])
            }
        }
        Value::Double(v) => block(&[header(PropertyType::Double, key, 0), v.to_bits()]),
        Value::String(s) => {
            let bytes = s.as_bytes();
            if bytes.len() <= SHORT_STRING_MAX {
                let mut words: SmallVec<[u64; 4]> = SmallVec::new();
                words.push(header(PropertyType::ShortString, key, bytes.len() as u64));
                words.extend(pack_words(bytes));
                block(&words)
            } else {
                let records = strings.allocate_records(bytes, string_ids);
                let pointer = dynamic_pointer(records[0].id)?;
                let mut out = block(&[header(PropertyType::String, key, pointer)]);
                out.value_records = records;
                out
            }
        }
        Value::Array(array) => match short_array_bytes(array) {
            Some(bytes) => {
                let payload = array_tag(array) as u64 | ((array.len() as u64) << 4);
                let mut words: SmallVec<[u64; 4]> = SmallVec::new();
                words.push(header(PropertyType::ShortArray, key, payload));
                words.extend(pack_words(&bytes));
                block(&words)
            }
            None => {
                let mut bytes = vec![array_tag(array)];
                bytes.extend_from_slice(&(array.len() as u32).to_be_bytes());
                encode_elements(array, &mut bytes);
                let records = arrays.allocate_records(&bytes, array_ids);
                let pointer = dynamic_pointer(records[0].id)?;
                let mut out = block(&[header(PropertyType::Array, key, pointer)]);
                out.value_records = records;
                out
            }
        },
        Value::Point(p) => block(&[
            header(PropertyType::Geometry, key, p.crs.code() as u64),
            p.x.to_bits(),
            p.y.to_bits(),
        ]),
        Value::Temporal(t) => {
            let (subtype, extra, word) = match t {
                TemporalValue::Date { epoch_day } => (1u64, 0u64, *epoch_day as u64),
                TemporalValue::LocalTime { nano_of_day } => (2, 0, *nano_of_day as u64),
                TemporalValue::LocalDateTime { epoch_millis } => (3, 0, *epoch_millis as u64),
                TemporalValue::DateTime {
                    epoch_millis,
                    offset_seconds,
                } => (4, *offset_seconds as u32 as u64, *epoch_millis as u64),
            };
            block(&[header(PropertyType::Temporal, key, subtype | (extra << 4)), word])
        }
    })
}

fn word(block: &PropertyBlock, idx: usize) -> Result<u64> {
    block
        .value_blocks
        .get(idx)
        .copied()
        .ok_or(PenumbraError::Corruption("property block too short"))
}

fn dynamic_bytes(block: &PropertyBlock, store: &DynamicStore) -> Result<Vec<u8>> {
    if !block.value_records.is_empty() {
        return Ok(concat(&block.value_records));
    }
    store.read_chain(block.payload())
}

/// Decodes a block back into its value, reading dynamic chains from the stores
/// unless the block already carries its value records.
pub fn decode_value(block: &PropertyBlock, strings: &DynamicStore, arrays: &DynamicStore) -> Result<Value> {
    let kind = block
        .property_type()
        .ok_or(PenumbraError::Corruption("unknown property type"))?;
    let payload = block.payload();
    Ok(match kind {
        PropertyType::Bool => Value::Bool(payload & 1 == 1),
        PropertyType::Byte => Value::Byte(payload as u8 as i8),
        PropertyType::Short => Value::Short(payload as u16 as i16),
        PropertyType::Char => Value::Char(
            char::from_u32(payload as u32).ok_or(PenumbraError::Corruption("invalid char property"))?,
        ),
        PropertyType::Int => Value::Int(payload as u32 as i32),
        PropertyType::Float => Value::Float(f32::from_bits(payload as u32)),
        PropertyType::Long => {
            if payload & 1 == 1 {
                let raw = payload >> 1;
                Value::Long(((raw << 29) as i64) >> 29)
            } else {
                Value::Long(word(block, 1)? as i64)
            }
        }
        PropertyType::Double => Value::Double(f64::from_bits(word(block, 1)?)),
        PropertyType::ShortString => {
            let len = (payload & 0x3F) as usize;
            let bytes = unpack_words(&block.value_blocks[1..], len);
            Value::String(
                String::from_utf8(bytes).map_err(|_| PenumbraError::Corruption("short string is not UTF-8"))?,
            )
        }
        PropertyType::ShortArray => {
            let tag = (payload & 0xF) as u8;
            let count = ((payload >> 4) & 0xFF) as usize;
            let bytes = unpack_words(&block.value_blocks[1..], usize::MAX);
            let mut reader = Reader::new(&bytes);
            Value::Array(decode_elements(tag, count, &mut reader)?)
        }
        PropertyType::String => {
            let bytes = dynamic_bytes(block, strings)?;
            Value::String(String::from_utf8(bytes).map_err(|_| PenumbraError::Corruption("string is not UTF-8"))?)
        }
        PropertyType::Array => {
            let bytes = dynamic_bytes(block, arrays)?;
            let mut reader = Reader::new(&bytes);
            let tag = reader.u8()?;
            let count = reader.u32()? as usize;
            Value::Array(decode_elements(tag, count, &mut reader)?)
        }
        PropertyType::Geometry => {
            let crs = Crs::from_code(payload as u8).ok_or(PenumbraError::Corruption("unknown crs"))?;
            Value::Point(Point {
                crs,
                x: f64::from_bits(word(block, 1)?),
                y: f64::from_bits(word(block, 2)?),
            })
        }
        PropertyType::Temporal => {
            let value = word(block, 1)? as i64;
            let extra = ((payload >> 4) & 0xFFFF_FFFF) as u32 as i32;
            Value::Temporal(match payload & 0xF {
                1 => TemporalValue::Date { epoch_day: value },
                2 => TemporalValue::LocalTime { nano_of_day: value },
                3 => TemporalValue::LocalDateTime { epoch_millis: value },
                4 => TemporalValue::DateTime {
                    epoch_millis: value,
                    offset_seconds: extra,
                },
                _ => return Err(PenumbraError::Corruption("unknown temporal subtype")),
            })
        }
    })
}
