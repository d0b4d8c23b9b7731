use crate::types::NULL_REFERENCE;

use super::{get_u32, get_u64, put_u32, put_u64, Record, IN_USE};

const START_RECORD: u8 = 0x02;

/// Bytes preceding the payload of a dynamic record.
pub const DYNAMIC_HEADER_LEN: usize = 13;

/// One link of a chain holding a variable-length value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicRecord {
    /// Record id.
    pub id: u64,
    /// Whether the slot is part of a live chain.
    pub in_use: bool,
    /// First record of its chain.
    pub start: bool,
    /// Next record of the chain.
    pub next: u64,
    /// Payload; its length is the number of meaningful bytes.
    pub data: Vec<u8>,
}

impl Record for DynamicRecord {
    const KIND: &'static str = "dynamic";

    fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            start: false,
            next: NULL_REFERENCE,
            data: Vec::new(),
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
        self.start = bytes[0] & START_RECORD != 0;
        let capacity = bytes.len() - DYNAMIC_HEADER_LEN;
        let length = (get_u32(bytes, 1) as usize).min(capacity);
        self.next = get_u64(bytes, 5);
        self.data.clear();
        self.data
            .extend_from_slice(&bytes[DYNAMIC_HEADER_LEN..DYNAMIC_HEADER_LEN + length]);
    }

    fn write(&self, bytes: &mut [u8]) {
        let mut flags = 0u8;
        if self.in_use {
            flags |= IN_USE;
        }
        if self.start {
            flags |= START_RECORD;
        }
        bytes[0] = flags;
        let capacity = bytes.len() - DYNAMIC_HEADER_LEN;
        let length = self.data.len().min(capacity);
        put_u32(bytes, 1, length as u32);
        put_u64(bytes, 5, self.next);
        bytes[DYNAMIC_HEADER_LEN..DYNAMIC_HEADER_LEN + length].copy_from_slice(&self.data[..length]);
        bytes[DYNAMIC_HEADER_LEN + length..].fill(0);
    }
}
