use crate::types::NULL_REFERENCE;

use super::{get_u64, put_u64, DynamicRecord, Record, IN_USE};

/// Points at the serialised form of one schema rule. The record id is the rule id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaRecord {
    /// Rule id.
    pub id: u64,
    /// Whether the rule exists.
    pub in_use: bool,
    /// First record of the serialised rule.
    pub payload_id: u64,
    /// Dynamic records of the rule payload when it is being written or deleted.
    pub payload_records: Vec<DynamicRecord>,
}

impl SchemaRecord {
    /// Encoded size in bytes.
    pub const SIZE: usize = 9;
}

impl Record for SchemaRecord {
    const KIND: &'static str = "schema";

    fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            payload_id: NULL_REFERENCE,
            payload_records: Vec::new(),
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
        self.payload_id = get_u64(bytes, 1);
        self.payload_records.clear();
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[0] = if self.in_use { IN_USE } else { 0 };
        put_u64(bytes, 1, self.payload_id);
    }

    fn is_consistent(&self) -> bool {
        self.payload_id != NULL_REFERENCE
    }
}
