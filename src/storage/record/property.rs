use smallvec::SmallVec;

use crate::types::{PropertyKeyId, NULL_REFERENCE};

use super::{get_u64, put_u64, DynamicRecord, Record, IN_USE};

/// Payload words available in one property record.
pub const PROPERTY_BLOCKS_PER_RECORD: usize = 4;

const PAYLOAD_OFFSET: usize = 17;

/// Type discriminant stored in the low four bits of a block's header word.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyType {
    /// `bool`, inline.
    Bool = 1,
    /// `i8`, inline.
    Byte = 2,
    /// `i16`, inline.
    Short = 3,
    /// A Unicode scalar, inline.
    Char = 4,
    /// `i32`, inline.
    Int = 5,
    /// `i64`, inline when it fits 35 bits, otherwise in a second word.
    Long = 6,
    /// `f32` bits, inline.
    Float = 7,
    /// `f64` bits in a second word.
    Double = 8,
    /// String in a dynamic chain.
    String = 9,
    /// Array in a dynamic chain.
    Array = 10,
    /// Short string packed into the block.
    ShortString = 11,
    /// Short numeric array packed into the block.
    ShortArray = 12,
    /// Point: coordinate reference system plus coordinates.
    Geometry = 13,
    /// Date, time or duration.
    Temporal = 14,
}

impl PropertyType {
    /// Type for a four-bit header code.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => PropertyType::Bool,
            2 => PropertyType::Byte,
            3 => PropertyType::Short,
            4 => PropertyType::Char,
            5 => PropertyType::Int,
            6 => PropertyType::Long,
            7 => PropertyType::Float,
            8 => PropertyType::Double,
            9 => PropertyType::String,
            10 => PropertyType::Array,
            11 => PropertyType::ShortString,
            12 => PropertyType::ShortArray,
            13 => PropertyType::Geometry,
            14 => PropertyType::Temporal,
            _ => return None,
        })
    }

    /// Whether the value lives in a dynamic record chain.
    pub fn is_dynamic(self) -> bool {
        matches!(self, PropertyType::String | PropertyType::Array)
    }
}

/// Width in bytes of one element of a short array, keyed by element tag.
fn short_array_element_width(tag: u8) -> Option<usize> {
    Some(match tag {
        1 | 2 => 1,
        3 => 2,
        4 | 5 | 7 => 4,
        6 | 8 => 8,
        _ => return None,
    })
}

/// Words needed by the block whose header word is `header`.
pub(crate) fn blocks_needed(header: u64) -> Option<usize> {
    let payload = header >> 28;
    let kind = PropertyType::from_code((header & 0xF) as u8)?;
    Some(match kind {
        PropertyType::Bool
        | PropertyType::Byte
        | PropertyType::Short
        | PropertyType::Char
        | PropertyType::Int
        | PropertyType::Float
        | PropertyType::String
        | PropertyType::Array => 1,
        PropertyType::Long => {
            if payload & 1 == 1 {
                1
            } else {
                2
            }
        }
        PropertyType::Double | PropertyType::Temporal => 2,
        PropertyType::Geometry => 3,
        PropertyType::ShortString => 1 + ((payload & 0x3F) as usize).div_ceil(8),
        PropertyType::ShortArray => {
            let tag = (payload & 0xF) as u8;
            let count = ((payload >> 4) & 0xFF) as usize;
            1 + (count * short_array_element_width(tag)?).div_ceil(8)
        }
    })
}

/// One encoded property: a header word followed by value words.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PropertyBlock {
    /// Header word followed by value words.
    pub value_blocks: SmallVec<[u64; PROPERTY_BLOCKS_PER_RECORD]>,
    /// Dynamic records holding the value when the type is `String` or `Array`.
    /// Only populated when the block is being written or deleted.
    pub value_records: Vec<DynamicRecord>,
}

impl PropertyBlock {
    /// The header word: type, key and payload bits.
    pub fn header(&self) -> u64 {
        self.value_blocks.first().copied().unwrap_or(0)
    }

    /// Property key of this block.
    pub fn key(&self) -> PropertyKeyId {
        PropertyKeyId(((self.header() >> 4) & 0xFF_FFFF) as u32)
    }

    /// Type named by the header, if valid.
    pub fn property_type(&self) -> Option<PropertyType> {
        PropertyType::from_code((self.header() & 0xF) as u8)
    }

    /// The 36 payload bits of the header word.
    pub fn payload(&self) -> u64 {
        self.header() >> 28
    }

    /// Number of words the block occupies.
    pub fn size(&self) -> usize {
        self.value_blocks.len()
    }

    /// First record of the value chain for dynamic types.
    pub fn dynamic_pointer(&self) -> Option<u64> {
        self.property_type()
            .filter(|kind| kind.is_dynamic())
            .map(|_| self.payload())
    }
}

/// Who a property chain belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyOwner {
    /// Chain of a node.
    Node(u64),
    /// Chain of a relationship.
    Relationship(u64),
}

/// A link of an entity's property chain holding up to four payload words.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyRecord {
    /// Record id.
    pub id: u64,
    /// Whether the slot holds a live link.
    pub in_use: bool,
    /// Previous link of the chain.
    pub prev_prop: u64,
    /// Next link of the chain.
    pub next_prop: u64,
    /// Blocks stored in this link.
    pub blocks: Vec<PropertyBlock>,
    /// Blocks removed or replaced in this change, their value records marked unused.
    pub removed_blocks: Vec<PropertyBlock>,
    /// Entity the chain belongs to. Not persisted in the store.
    pub owner: Option<PropertyOwner>,
}

impl PropertyRecord {
    /// Encoded size in bytes.
    pub const SIZE: usize = PAYLOAD_OFFSET + PROPERTY_BLOCKS_PER_RECORD * 8;

    /// Words taken by the current blocks.
    pub fn used_words(&self) -> usize {
        self.blocks.iter().map(PropertyBlock::size).sum()
    }

    /// Words still free.
    pub fn free_words(&self) -> usize {
        PROPERTY_BLOCKS_PER_RECORD.saturating_sub(self.used_words())
    }

    /// Block for `key`, if present.
    pub fn block(&self, key: PropertyKeyId) -> Option<&PropertyBlock> {
        self.blocks.iter().find(|block| block.key() == key)
    }

    /// Mutable block for `key`, if present.
    pub fn block_mut(&mut self, key: PropertyKeyId) -> Option<&mut PropertyBlock> {
        self.blocks.iter_mut().find(|block| block.key() == key)
    }

    /// Takes out the block for `key`.
    pub fn remove_block(&mut self, key: PropertyKeyId) -> Option<PropertyBlock> {
        let idx = self.blocks.iter().position(|block| block.key() == key)?;
        Some(self.blocks.remove(idx))
    }

    /// Appends a block; the caller checks that it fits.
    pub fn add_block(&mut self, block: PropertyBlock) {
        debug_assert!(block.size() <= self.free_words());
        self.blocks.push(block);
    }
}

impl Record for PropertyRecord {
    const KIND: &'static str = "property";

    fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            prev_prop: NULL_REFERENCE,
            next_prop: NULL_REFERENCE,
            blocks: Vec::new(),
            removed_blocks: Vec::new(),
            owner: None,
        }
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    fn read(&mut self, id: u64, bytes: &[u8]) {
        self.id = id;
        self.in_use = bytes[0] & IN_USE != 0;
        self.prev_prop = get_u64(bytes, 1);
        self.next_prop = get_u64(bytes, 9);
        self.blocks.clear();
        self.removed_blocks.clear();
        self.owner = None;
        let mut words = [0u64; PROPERTY_BLOCKS_PER_RECORD];
        for (i, word) in words.iter_mut().enumerate() {
            *word = get_u64(bytes, PAYLOAD_OFFSET + i * 8);
        }
        let mut i = 0;
        while i < PROPERTY_BLOCKS_PER_RECORD && words[i] != 0 {
            let Some(n) = blocks_needed(words[i]) else { break };
            if i + n > PROPERTY_BLOCKS_PER_RECORD {
                break;
            }
            self.blocks.push(PropertyBlock {
                value_blocks: SmallVec::from_slice(&words[i..i + n]),
                value_records: Vec::new(),
            });
            i += n;
        }
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[0] = if self.in_use { IN_USE } else { 0 };
        put_u64(bytes, 1, self.prev_prop);
        put_u64(bytes, 9, self.next_prop);
        let mut i = 0;
        for word in self.blocks.iter().flat_map(|b| b.value_blocks.iter()) {
            if i == PROPERTY_BLOCKS_PER_RECORD {
                break;
            }
            put_u64(bytes, PAYLOAD_OFFSET + i * 8, *word);
            i += 1;
        }
        while i < PROPERTY_BLOCKS_PER_RECORD {
            put_u64(bytes, PAYLOAD_OFFSET + i * 8, 0);
            i += 1;
        }
    }

    fn is_consistent(&self) -> bool {
        self.used_words() <= PROPERTY_BLOCKS_PER_RECORD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(kind: PropertyType, key: u32, payload: u64) -> u64 {
        (payload << 28) | ((key as u64) << 4) | kind as u64
    }

    #[test]
    fn parses_mixed_block_sizes() {
        let mut record = PropertyRecord::new(1);
        record.in_use = true;
        record.add_block(PropertyBlock {
            value_blocks: SmallVec::from_slice(&[header(PropertyType::Int, 7, 42)]),
            value_records: Vec::new(),
        });
        record.add_block(PropertyBlock {
            value_blocks: SmallVec::from_slice(&[header(PropertyType::Double, 8, 0), 1.5f64.to_bits()]),
            value_records: Vec::new(),
        });
        assert_eq!(record.free_words(), 1);
        let mut bytes = [0u8; PropertyRecord::SIZE];
        record.write(&mut bytes);
        let mut back = PropertyRecord::new(0);
        back.read(1, &bytes);
        assert_eq!(back.blocks.len(), 2);
        assert_eq!(back.block(PropertyKeyId(8)).unwrap().value_blocks[1], 1.5f64.to_bits());
        assert_eq!(back.block(PropertyKeyId(7)).unwrap().payload(), 42);
    }

    #[test]
    fn inline_long_uses_one_word() {
        assert_eq!(blocks_needed(header(PropertyType::Long, 1, 0b11)), Some(1));
        assert_eq!(blocks_needed(header(PropertyType::Long, 1, 0b10)), Some(2));
        assert_eq!(blocks_needed(header(PropertyType::ShortString, 1, 17)), Some(4));
        assert_eq!(blocks_needed(0xF), None);
    }
}
