use crate::types::NULL_REFERENCE;

use super::{get_u32, get_u64, put_u32, put_u64, Record, IN_USE};

/// Which of a group's three chains a relationship belongs to, seen from the owning node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GroupDirection {
    /// The owning node is the start node.
    Outgoing,
    /// The owning node is the end node.
    Incoming,
    /// Start and end are the owning node.
    Loop,
}

impl GroupDirection {
    /// Direction of a relationship between `first` and `second` as seen from `node`.
    pub fn of(node: u64, first: u64, second: u64) -> Self {
        if first == second {
            GroupDirection::Loop
        } else if first == node {
            GroupDirection::Outgoing
        } else {
            GroupDirection::Incoming
        }
    }
}

/// Per-type index for a dense node: heads of its outgoing, incoming and loop chains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationshipGroupRecord {
    /// Record id.
    pub id: u64,
    /// Whether the slot holds a live group.
    pub in_use: bool,
    /// Relationship type this group indexes.
    pub rel_type: u32,
    /// Next group of the owning node.
    pub next: u64,
    /// Head of the outgoing chain.
    pub first_out: u64,
    /// Head of the incoming chain.
    pub first_in: u64,
    /// Head of the loop chain.
    pub first_loop: u64,
    /// Dense node owning this group.
    pub owning_node: u64,
}

impl RelationshipGroupRecord {
    /// Encoded size in bytes.
    pub const SIZE: usize = 45;

    /// Head of the chain for `direction`.
    pub fn head(&self, direction: GroupDirection) -> u64 {
        match direction {
            GroupDirection::Outgoing => self.first_out,
            GroupDirection::Incoming => self.first_in,
            GroupDirection::Loop => self.first_loop,
        }
    }

    /// Replaces the head of the chain for `direction`.
    pub fn set_head(&mut self, direction: GroupDirection, value: u64) {
        match direction {
            GroupDirection::Outgoing => self.first_out = value,
            GroupDirection::Incoming => self.first_in = value,
            GroupDirection::Loop => self.first_loop = value,
        }
    }

    /// No chain hangs off this group any more.
    pub fn is_empty(&self) -> bool {
        self.first_out == NULL_REFERENCE
            && self.first_in == NULL_REFERENCE
            && self.first_loop == NULL_REFERENCE
    }
}

impl Record for RelationshipGroupRecord {
    const KIND: &'static str = "relationship group";

    fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            rel_type: 0,
            next: NULL_REFERENCE,
            first_out: NULL_REFERENCE,
            first_in: NULL_REFERENCE,
            first_loop: NULL_REFERENCE,
            owning_node: NULL_REFERENCE,
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
        self.rel_type = get_u32(bytes, 1);
        self.next = get_u64(bytes, 5);
        self.first_out = get_u64(bytes, 13);
        self.first_in = get_u64(bytes, 21);
        self.first_loop = get_u64(bytes, 29);
        self.owning_node = get_u64(bytes, 37);
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[0] = if self.in_use { IN_USE } else { 0 };
        put_u32(bytes, 1, self.rel_type);
        put_u64(bytes, 5, self.next);
        put_u64(bytes, 13, self.first_out);
        put_u64(bytes, 21, self.first_in);
        put_u64(bytes, 29, self.first_loop);
        put_u64(bytes, 37, self.owning_node);
    }

    fn is_consistent(&self) -> bool {
        self.owning_node != NULL_REFERENCE
    }
}
