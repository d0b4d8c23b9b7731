use crate::types::NULL_REFERENCE;

use super::{get_u64, put_u64, DynamicRecord, Record, IN_USE};

/// A label, relationship type or property key token. The name lives in the
/// token name store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    /// Token id.
    pub id: u64,
    /// Whether the token exists.
    pub in_use: bool,
    /// First record of the name chain.
    pub name_id: u64,
    /// Name records when the token is being written.
    pub name_records: Vec<DynamicRecord>,
}

impl TokenRecord {
    /// Encoded size in bytes.
    pub const SIZE: usize = 9;
}

impl Record for TokenRecord {
    const KIND: &'static str = "token";

    fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            name_id: NULL_REFERENCE,
            name_records: Vec::new(),
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
        self.name_id = get_u64(bytes, 1);
        self.name_records.clear();
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[0] = if self.in_use { IN_USE } else { 0 };
        put_u64(bytes, 1, self.name_id);
    }
}
