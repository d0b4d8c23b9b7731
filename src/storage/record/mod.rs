//! Fixed-size record formats.
//!
//! Every record starts with a flags byte whose lowest bit is the in-use flag.
//! Multi-byte fields are big-endian. Pointer fields hold
//! [`NULL_REFERENCE`](crate::types::NULL_REFERENCE) when they point nowhere.

use std::fmt;

mod dynamic;
mod group;
mod meta;
mod node;
mod property;
mod relationship;
mod schema;
mod token;

pub use dynamic::{DynamicRecord, DYNAMIC_HEADER_LEN};
pub use group::{GroupDirection, RelationshipGroupRecord};
pub use meta::MetaRecord;
pub use node::NodeRecord;
#[cfg(test)]
pub(crate) use property::blocks_needed;
pub use property::{
    PropertyBlock, PropertyOwner, PropertyRecord, PropertyType, PROPERTY_BLOCKS_PER_RECORD,
};
pub use relationship::{RelationshipRecord, Side};
pub use schema::SchemaRecord;
pub use token::TokenRecord;

/// Bit of the flags byte marking a record as in use.
pub const IN_USE: u8 = 0x01;

/// How strictly a record read validates what it finds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordLoad {
    /// The record must be in use and consistent.
    Normal,
    /// Unused or inconsistent records come back cleared and marked unused.
    Check,
    /// Raw bytes are decoded regardless of the in-use flag or consistency.
    Force,
}

/// A fixed-size record stored in a [`RecordStore`](crate::storage::RecordStore).
pub trait Record: Clone + fmt::Debug + Send + Sync + 'static {
    /// Human readable store name used in errors.
    const KIND: &'static str;

    /// A cleared, unused record with the given id.
    fn new(id: u64) -> Self;

    /// Record id.
    fn id(&self) -> u64;

    /// In-use flag.
    fn in_use(&self) -> bool;

    /// Sets the in-use flag.
    fn set_in_use(&mut self, in_use: bool);

    /// Decodes `bytes` into `self`.
    fn read(&mut self, id: u64, bytes: &[u8]);

    /// Encodes `self` into `bytes`.
    fn write(&self, bytes: &mut [u8]);

    /// Cheap structural validation applied by `Normal` and `Check` loads.
    fn is_consistent(&self) -> bool {
        true
    }

    /// Resets every field while keeping the id.
    fn clear(&mut self) {
        *self = Self::new(self.id());
    }
}

pub(crate) fn get_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_be_bytes(raw)
}

pub(crate) fn get_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(raw)
}

pub(crate) fn put_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn put_u64(bytes: &mut [u8], at: usize, value: u64) {
    bytes[at..at + 8].copy_from_slice(&value.to_be_bytes());
}
