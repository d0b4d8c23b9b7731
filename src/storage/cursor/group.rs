use std::collections::{BTreeMap, VecDeque};

use crate::primitives::pager::{PageAccess, PageCursor};
use crate::types::{RelTypeId, Result, NULL_REFERENCE};

use super::super::record::{
    GroupDirection, Record, RecordLoad, RelationshipGroupRecord, RelationshipRecord,
};
use super::super::stores::RecordStores;
use super::{Direction, RelationshipSelection, RelationshipTraversalCursor};

/// Relationships of one type of a sparse node, bucketed by direction.
#[derive(Clone, Debug, Default)]
pub struct BufferedGroup {
    /// Relationship type of the bucket.
    pub rel_type: u32,
    /// Relationships starting at the node.
    pub outgoing: Vec<RelationshipRecord>,
    /// Relationships ending at the node.
    pub incoming: Vec<RelationshipRecord>,
    /// Self-loops.
    pub loops: Vec<RelationshipRecord>,
}

impl BufferedGroup {
    fn bucket(&mut self, direction: GroupDirection) -> &mut Vec<RelationshipRecord> {
        match direction {
            GroupDirection::Outgoing => &mut self.outgoing,
            GroupDirection::Incoming => &mut self.incoming,
            GroupDirection::Loop => &mut self.loops,
        }
    }
}

enum Current {
    None,
    Stored,
    Buffered(BufferedGroup),
}

/// Iterates the per-type relationship groups of a node.
///
/// Dense nodes are read from their group records. For a sparse node the chain
/// is walked once at `init` and bucketed by type, so the cursor behaves the
/// same either way.
pub struct RelationshipGroupCursor<'a> {
    stores: &'a RecordStores,
    page: Option<PageCursor>,
    rel_page: Option<PageCursor>,
    node: u64,
    next_group: u64,
    group: RelationshipGroupRecord,
    buffered: VecDeque<BufferedGroup>,
    current: Current,
}

impl<'a> RelationshipGroupCursor<'a> {
    /// An unpositioned cursor.
    pub fn new(stores: &'a RecordStores) -> Self {
        Self {
            stores,
            page: None,
            rel_page: None,
            node: NULL_REFERENCE,
            next_group: NULL_REFERENCE,
            group: RelationshipGroupRecord::new(NULL_REFERENCE),
            buffered: VecDeque::new(),
            current: Current::None,
        }
    }

    /// Positions the cursor before the first group of `node`.
    pub fn init(&mut self, node: u64, reference: u64, dense: bool) -> Result<()> {
        self.node = node;
        self.buffered.clear();
        self.current = Current::None;
        if dense {
            self.next_group = reference;
            return Ok(());
        }
        self.next_group = NULL_REFERENCE;
        let mut chain = RelationshipTraversalCursor::new(self.stores);
        chain.init(node, reference, false, RelationshipSelection::all());
        let mut groups: BTreeMap<u32, BufferedGroup> = BTreeMap::new();
        while chain.next()? {
            let record = chain.record().clone();
            let direction = GroupDirection::of(node, record.first_node, record.second_node);
            groups
                .entry(record.rel_type)
                .or_insert_with(|| BufferedGroup {
                    rel_type: record.rel_type,
                    ..BufferedGroup::default()
                })
                .bucket(direction)
                .push(record);
        }
        chain.close();
        self.buffered = groups.into_values().collect();
        Ok(())
    }

    /// Advances to the next group.
    pub fn next(&mut self) -> Result<bool> {
        if let Some(group) = self.buffered.pop_front() {
            self.current = Current::Buffered(group);
            return Ok(true);
        }
        let store = &self.stores.groups;
        let mut guard = 0u64;
        while self.next_group != NULL_REFERENCE && guard <= store.high_id() {
            guard += 1;
            let id = self.next_group;
            let page = self
                .page
                .get_or_insert_with(|| store.open_cursor(PageAccess::Read));
            store.read_record(id, &mut self.group, RecordLoad::Force, page)?;
            self.next_group = self.group.next;
            if self.group.in_use {
                self.current = Current::Stored;
                return Ok(true);
            }
        }
        self.next_group = NULL_REFERENCE;
        self.current = Current::None;
        Ok(false)
    }

    /// Type of the current group.
    pub fn rel_type(&self) -> RelTypeId {
        match &self.current {
            Current::Buffered(group) => RelTypeId(group.rel_type),
            _ => RelTypeId(self.group.rel_type),
        }
    }

    fn chain_count(&mut self, direction: GroupDirection) -> Result<u64> {
        match &self.current {
            Current::None => Ok(0),
            Current::Buffered(group) => Ok(match direction {
                GroupDirection::Outgoing => group.outgoing.len(),
                GroupDirection::Incoming => group.incoming.len(),
                GroupDirection::Loop => group.loops.len(),
            } as u64),
            Current::Stored => {
                let head = self.group.head(direction);
                if head == NULL_REFERENCE {
                    return Ok(0);
                }
                let store = &self.stores.relationships;
                let page = self
                    .rel_page
                    .get_or_insert_with(|| store.open_cursor(PageAccess::Read));
                let mut record = RelationshipRecord::new(head);
                store.read_record(head, &mut record, RecordLoad::Force, page)?;
                match record.side_of(self.node) {
                    Some(side) if record.is_first_in_chain(side) => Ok(record.prev(side)),
                    _ => Ok(0),
                }
            }
        }
    }

    /// Relationships of this type starting at the node, excluding loops.
    pub fn outgoing_count(&mut self) -> Result<u64> {
        self.chain_count(GroupDirection::Outgoing)
    }

    /// Relationships of this type ending at the node, excluding loops.
    pub fn incoming_count(&mut self) -> Result<u64> {
        self.chain_count(GroupDirection::Incoming)
    }

    /// Self-loops of this type.
    pub fn loop_count(&mut self) -> Result<u64> {
        self.chain_count(GroupDirection::Loop)
    }

    /// Every relationship of this type at the node.
    pub fn total_count(&mut self) -> Result<u64> {
        Ok(self.outgoing_count()? + self.incoming_count()? + self.loop_count()?)
    }

    fn chain(&self, traversal: &mut RelationshipTraversalCursor<'a>, direction: GroupDirection) {
        let selection_direction = match direction {
            GroupDirection::Outgoing => Direction::Outgoing,
            GroupDirection::Incoming => Direction::Incoming,
            GroupDirection::Loop => Direction::Both,
        };
        match &self.current {
            Current::Buffered(group) => {
                let records = match direction {
                    GroupDirection::Outgoing => group.outgoing.clone(),
                    GroupDirection::Incoming => group.incoming.clone(),
                    GroupDirection::Loop => group.loops.clone(),
                };
                traversal.init_records(
                    self.node,
                    records,
                    RelationshipSelection::typed(RelTypeId(group.rel_type), selection_direction),
                );
            }
            Current::Stored => traversal.init_group_chain(
                self.node,
                self.group.head(direction),
                self.group.rel_type,
                selection_direction,
            ),
            Current::None => traversal.init_records(self.node, Vec::new(), RelationshipSelection::all()),
        }
    }

    /// Points `traversal` at the outgoing relationships of this group.
    pub fn outgoing(&self, traversal: &mut RelationshipTraversalCursor<'a>) {
        self.chain(traversal, GroupDirection::Outgoing);
    }

    /// Points `traversal` at the incoming relationships of this group.
    pub fn incoming(&self, traversal: &mut RelationshipTraversalCursor<'a>) {
        self.chain(traversal, GroupDirection::Incoming);
    }

    /// Points `traversal` at the loops of this group.
    pub fn loops(&self, traversal: &mut RelationshipTraversalCursor<'a>) {
        self.chain(traversal, GroupDirection::Loop);
    }

    /// Releases the pinned page.
    pub fn close(&mut self) {
        if let Some(mut page) = self.page.take() {
            page.close();
        }
        if let Some(mut page) = self.rel_page.take() {
            page.close();
        }
        self.buffered.clear();
        self.current = Current::None;
        self.next_group = NULL_REFERENCE;
    }
}
