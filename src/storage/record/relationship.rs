use crate::types::NULL_REFERENCE;

use super::{get_u32, get_u64, put_u32, put_u64, Record, IN_USE};

const FIRST_IN_FIRST_CHAIN: u8 = 0x02;
const FIRST_IN_SECOND_CHAIN: u8 = 0x04;

/// Which endpoint's chain a pointer pair belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    /// Chain of the start node.
    First,
    /// Chain of the end node.
    Second,
}

/// A relationship and its position in both endpoints' doubly-linked chains.
///
/// When a record is first in a chain its `prev` pointer for that chain holds
/// the chain's length instead of a record id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationshipRecord {
    /// Record id.
    pub id: u64,
    /// Whether the slot holds a live relationship.
    pub in_use: bool,
    /// Relationship type token.
    pub rel_type: u32,
    /// Start node.
    pub first_node: u64,
    /// End node.
    pub second_node: u64,
    /// Previous record in the start node's chain, or the chain length when first.
    pub first_prev: u64,
    /// Next record in the start node's chain.
    pub first_next: u64,
    /// Previous record in the end node's chain, or the chain length when first.
    pub second_prev: u64,
    /// Next record in the end node's chain.
    pub second_next: u64,
    /// Head of the start node's chain.
    pub first_in_first_chain: bool,
    /// Head of the end node's chain.
    pub first_in_second_chain: bool,
    /// First record of the property chain.
    pub next_prop: u64,
}

impl RelationshipRecord {
    /// Encoded size in bytes.
    pub const SIZE: usize = 61;

    /// Side of the chain belonging to `node`. Self-loops live in the first chain only.
    pub fn side_of(&self, node: u64) -> Option<Side> {
        if self.first_node == node {
            Some(Side::First)
        } else if self.second_node == node {
            Some(Side::Second)
        } else {
            None
        }
    }

    /// Whether both endpoints are the same node.
    pub fn is_loop(&self) -> bool {
        self.first_node == self.second_node
    }

    /// Previous pointer (or chain length) on `side`.
    pub fn prev(&self, side: Side) -> u64 {
        match side {
            Side::First => self.first_prev,
            Side::Second => self.second_prev,
        }
    }

    /// Next pointer on `side`.
    pub fn next(&self, side: Side) -> u64 {
        match side {
            Side::First => self.first_next,
            Side::Second => self.second_next,
        }
    }

    /// Sets the previous pointer on `side`.
    pub fn set_prev(&mut self, side: Side, value: u64) {
        match side {
            Side::First => self.first_prev = value,
            Side::Second => self.second_prev = value,
        }
    }

    /// Sets the next pointer on `side`.
    pub fn set_next(&mut self, side: Side, value: u64) {
        match side {
            Side::First => self.first_next = value,
            Side::Second => self.second_next = value,
        }
    }

    /// Whether this record heads the chain on `side`.
    pub fn is_first_in_chain(&self, side: Side) -> bool {
        match side {
            Side::First => self.first_in_first_chain,
            Side::Second => self.first_in_second_chain,
        }
    }

    /// Marks this record as head of the chain on `side`.
    pub fn set_first_in_chain(&mut self, side: Side, first: bool) {
        match side {
            Side::First => self.first_in_first_chain = first,
            Side::Second => self.first_in_second_chain = first,
        }
    }

    /// Next record in `node`'s chain, if `node` is an endpoint.
    pub fn next_for(&self, node: u64) -> Option<u64> {
        self.side_of(node).map(|side| self.next(side))
    }
}

impl Record for RelationshipRecord {
    const KIND: &'static str = "relationship";

    fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            rel_type: 0,
            first_node: NULL_REFERENCE,
            second_node: NULL_REFERENCE,
            first_prev: NULL_REFERENCE,
            first_next: NULL_REFERENCE,
            second_prev: NULL_REFERENCE,
            second_next: NULL_REFERENCE,
            first_in_first_chain: false,
            first_in_second_chain: false,
            next_prop: NULL_REFERENCE,
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
        let flags = bytes[0];
        self.id = id;
        self.in_use = flags & IN_USE != 0;
        self.first_in_first_chain = flags & FIRST_IN_FIRST_CHAIN != 0;
        self.first_in_second_chain = flags & FIRST_IN_SECOND_CHAIN != 0;
        self.rel_type = get_u32(bytes, 1);
        self.first_node = get_u64(bytes, 5);
        self.second_node = get_u64(bytes, 13);
        self.first_prev = get_u64(bytes, 21);
        self.first_next = get_u64(bytes, 29);
        self.second_prev = get_u64(bytes, 37);
        self.second_next = get_u64(bytes, 45);
        self.next_prop = get_u64(bytes, 53);
    }

    fn write(&self, bytes: &mut [u8]) {
        let mut flags = 0u8;
        if self.in_use {
            flags |= IN_USE;
        }
        if self.first_in_first_chain {
            flags |= FIRST_IN_FIRST_CHAIN;
        }
        if self.first_in_second_chain {
            flags |= FIRST_IN_SECOND_CHAIN;
        }
        bytes[0] = flags;
        put_u32(bytes, 1, self.rel_type);
        put_u64(bytes, 5, self.first_node);
        put_u64(bytes, 13, self.second_node);
        put_u64(bytes, 21, self.first_prev);
        put_u64(bytes, 29, self.first_next);
        put_u64(bytes, 37, self.second_prev);
        put_u64(bytes, 45, self.second_next);
        put_u64(bytes, 53, self.next_prop);
    }

    fn is_consistent(&self) -> bool {
        self.first_node != NULL_REFERENCE && self.second_node != NULL_REFERENCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loops_use_the_first_chain() {
        let mut rel = RelationshipRecord::new(1);
        rel.first_node = 4;
        rel.second_node = 4;
        assert_eq!(rel.side_of(4), Some(Side::First));
        assert!(rel.is_loop());
        assert_eq!(rel.side_of(5), None);
    }

    #[test]
    fn relationship_bytes_roundtrip() {
        let mut rel = RelationshipRecord::new(9);
        rel.in_use = true;
        rel.rel_type = 3;
        rel.first_node = 1;
        rel.second_node = 2;
        rel.first_prev = 5;
        rel.first_in_second_chain = true;
        rel.second_prev = 1;
        let mut bytes = [0u8; RelationshipRecord::SIZE];
        rel.write(&mut bytes);
        let mut back = RelationshipRecord::new(0);
        back.read(9, &bytes);
        assert_eq!(back, rel);
        assert!(back.is_consistent());
    }
}
