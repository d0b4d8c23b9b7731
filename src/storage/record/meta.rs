use super::{get_u64, put_u64, Record, IN_USE};

/// One slot of the metadata store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetaRecord {
    /// Slot position.
    pub id: u64,
    /// Whether the slot was ever written.
    pub in_use: bool,
    /// Stored value.
    pub value: u64,
}

impl MetaRecord {
    /// Encoded size in bytes.
    pub const SIZE: usize = 9;
}

impl Record for MetaRecord {
    const KIND: &'static str = "metadata";

    fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            value: 0,
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
        self.value = get_u64(bytes, 1);
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[0] = if self.in_use { IN_USE } else { 0 };
        put_u64(bytes, 1, self.value);
    }
}
