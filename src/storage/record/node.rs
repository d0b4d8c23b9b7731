use crate::types::NULL_REFERENCE;

use super::{get_u64, put_u64, DynamicRecord, Record, IN_USE};

const DENSE: u8 = 0x02;

/// A node: the head of its relationship chain (or group chain when dense),
/// the head of its property chain and the packed label field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    /// Record id.
    pub id: u64,
    /// Whether the slot holds a live node.
    pub in_use: bool,
    /// Whether relationships are reached through groups.
    pub dense: bool,
    /// First relationship when sparse, first relationship group when dense.
    pub next_rel: u64,
    /// First record of the property chain.
    pub next_prop: u64,
    /// Inline labels or a pointer into the label store; see `storage::labels`.
    pub labels: u64,
    /// Label store records backing a dynamic label field. Records that were
    /// replaced stay here marked unused so that commands free them.
    pub dynamic_labels: Vec<DynamicRecord>,
}

impl NodeRecord {
    /// Encoded size in bytes.
    pub const SIZE: usize = 25;
}

impl Record for NodeRecord {
    const KIND: &'static str = "node";

    fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            dense: false,
            next_rel: NULL_REFERENCE,
            next_prop: NULL_REFERENCE,
            labels: 0,
            dynamic_labels: Vec::new(),
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
        self.dense = bytes[0] & DENSE != 0;
        self.next_rel = get_u64(bytes, 1);
        self.next_prop = get_u64(bytes, 9);
        self.labels = get_u64(bytes, 17);
        self.dynamic_labels.clear();
    }

    fn write(&self, bytes: &mut [u8]) {
        let mut flags = 0u8;
        if self.in_use {
            flags |= IN_USE;
        }
        if self.dense {
            flags |= DENSE;
        }
        bytes[0] = flags;
        put_u64(bytes, 1, self.next_rel);
        put_u64(bytes, 9, self.next_prop);
        put_u64(bytes, 17, self.labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_bytes_roundtrip() {
        let mut node = NodeRecord::new(3);
        node.in_use = true;
        node.dense = true;
        node.next_rel = 10;
        node.labels = 0x1000_0000_0000_0005;
        let mut bytes = [0u8; NodeRecord::SIZE];
        node.write(&mut bytes);
        let mut back = NodeRecord::new(0);
        back.read(3, &bytes);
        assert_eq!(back, node);
    }
}
