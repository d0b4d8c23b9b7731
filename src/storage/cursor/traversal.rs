use std::collections::VecDeque;

use crate::primitives::pager::{PageAccess, PageCursor};
use crate::types::{NodeId, RelTypeId, RelationshipId, Result, NULL_REFERENCE};

use super::super::record::{
    GroupDirection, Record, RecordLoad, RelationshipGroupRecord, RelationshipRecord,
};
use super::super::stores::RecordStores;
use super::{Direction, RelationshipSelection};

/// Where a traversal currently reads from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraversalState {
    /// Following a sparse node's single chain.
    Chain,
    /// Following the incoming chain of the current group.
    GroupIncoming,
    /// Following the outgoing chain of the current group.
    GroupOutgoing,
    /// Following the loop chain of the current group.
    GroupLoop,
    /// Serving preloaded records.
    Buffered,
    /// Exhausted or never initialised.
    None,
}

/// Walks the relationships of one node.
///
/// Chain records are read with [`RecordLoad::Force`] so a relationship deleted
/// concurrently still yields its next pointer; such records are skipped rather
/// than ending the walk.
pub struct RelationshipTraversalCursor<'a> {
    stores: &'a RecordStores,
    rel_page: Option<PageCursor>,
    group_page: Option<PageCursor>,
    state: TraversalState,
    node: u64,
    selection: RelationshipSelection,
    next_rel: u64,
    next_group: u64,
    group: RelationshipGroupRecord,
    buffer: VecDeque<RelationshipRecord>,
    record: RelationshipRecord,
    group_loaded: bool,
    steps: u64,
}

impl<'a> RelationshipTraversalCursor<'a> {
    /// An unpositioned cursor.
    pub fn new(stores: &'a RecordStores) -> Self {
        Self {
            stores,
            rel_page: None,
            group_page: None,
            state: TraversalState::None,
            node: NULL_REFERENCE,
            selection: RelationshipSelection::all(),
            next_rel: NULL_REFERENCE,
            next_group: NULL_REFERENCE,
            group: RelationshipGroupRecord::new(NULL_REFERENCE),
            buffer: VecDeque::new(),
            record: RelationshipRecord::new(NULL_REFERENCE),
            group_loaded: false,
            steps: 0,
        }
    }

    fn reset(&mut self, node: u64, selection: RelationshipSelection) {
        self.node = node;
        self.selection = selection;
        self.next_rel = NULL_REFERENCE;
        self.next_group = NULL_REFERENCE;
        self.buffer.clear();
        self.record.clear();
        self.steps = 0;
    }

    /// Starts at `reference`: the first relationship of a sparse node, or the
    /// first group of a dense one.
    pub fn init(&mut self, node: u64, reference: u64, dense: bool, selection: RelationshipSelection) {
        self.reset(node, selection);
        if dense {
            self.next_group = reference;
            self.group_loaded = false;
            self.state = TraversalState::GroupIncoming;
        } else {
            self.next_rel = reference;
            self.state = TraversalState::Chain;
        }
    }

    /// Loads every selected relationship of `node` up front, ordered by type,
    /// and serves them from memory.
    pub fn init_buffered(
        &mut self,
        node: u64,
        reference: u64,
        dense: bool,
        selection: RelationshipSelection,
    ) -> Result<()> {
        let mut loader = RelationshipTraversalCursor::new(self.stores);
        loader.init(node, reference, dense, selection.clone());
        let mut records = Vec::new();
        while loader.next()? {
            records.push(loader.record.clone());
        }
        loader.close();
        records.sort_by_key(|r| r.rel_type);
        self.init_records(node, records, selection);
        Ok(())
    }

    /// Serves `records` as the relationships of `node`.
    pub(crate) fn init_records(
        &mut self,
        node: u64,
        records: Vec<RelationshipRecord>,
        selection: RelationshipSelection,
    ) {
        self.reset(node, selection);
        self.buffer = records.into();
        self.state = TraversalState::Buffered;
    }

    /// Follows one chain of a dense node's group, starting at `head`.
    pub(crate) fn init_group_chain(&mut self, node: u64, head: u64, rel_type: u32, direction: Direction) {
        self.reset(
            node,
            RelationshipSelection::typed(RelTypeId(rel_type), direction),
        );
        self.next_rel = head;
        self.state = TraversalState::Chain;
    }

    /// Where the cursor reads from.
    pub fn state(&self) -> TraversalState {
        self.state
    }

    fn read_relationship(&mut self, id: u64) -> Result<()> {
        let store = &self.stores.relationships;
        let page = self
            .rel_page
            .get_or_insert_with(|| store.open_cursor(PageAccess::Read));
        store.read_record(id, &mut self.record, RecordLoad::Force, page)
    }

    fn chain_guard(&mut self) -> bool {
        self.steps += 1;
        self.steps <= self.stores.relationships.high_id() + self.stores.groups.high_id() + 1
    }

    /// Reads the chain record at `next_rel`; returns whether it should be yielded.
    fn step_chain(&mut self) -> Result<bool> {
        let id = self.next_rel;
        self.read_relationship(id)?;
        match self.record.next_for(self.node) {
            Some(next) if self.chain_guard() => self.next_rel = next,
            _ => {
                self.next_rel = NULL_REFERENCE;
                return Ok(false);
            }
        }
        Ok(self.record.in_use() && self.selection.accepts(self.node, &self.record))
    }

    fn load_next_group(&mut self) -> Result<bool> {
        let store = &self.stores.groups;
        while self.next_group != NULL_REFERENCE {
            let id = self.next_group;
            let page = self
                .group_page
                .get_or_insert_with(|| store.open_cursor(PageAccess::Read));
            store.read_record(id, &mut self.group, RecordLoad::Force, page)?;
            self.next_group = self.group.next;
            if !self.chain_guard() {
                self.next_group = NULL_REFERENCE;
                return Ok(false);
            }
            if self.group.in_use && self.selection.accepts_type(self.group.rel_type) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn head_if_selected(&self, direction: GroupDirection) -> u64 {
        let wanted = match direction {
            GroupDirection::Loop => true,
            GroupDirection::Outgoing => self.selection.direction != Direction::Incoming,
            GroupDirection::Incoming => self.selection.direction != Direction::Outgoing,
        };
        if wanted {
            self.group.head(direction)
        } else {
            NULL_REFERENCE
        }
    }

    /// Advances to the next selected relationship.
    pub fn next(&mut self) -> Result<bool> {
        loop {
            match self.state {
                TraversalState::None => return Ok(false),
                TraversalState::Chain => {
                    if self.next_rel == NULL_REFERENCE {
                        self.state = TraversalState::None;
                        self.record.clear();
                        return Ok(false);
                    }
                    if self.step_chain()? {
                        return Ok(true);
                    }
                }
                TraversalState::Buffered => match self.buffer.pop_front() {
                    Some(record) => {
                        if self.selection.accepts(self.node, &record) {
                            self.record = record;
                            return Ok(true);
                        }
                    }
                    None => {
                        self.state = TraversalState::None;
                        self.record.clear();
                        return Ok(false);
                    }
                },
                TraversalState::GroupIncoming
                | TraversalState::GroupOutgoing
                | TraversalState::GroupLoop => {
                    if !self.group_loaded {
                        if self.load_next_group()? {
                            self.group_loaded = true;
                            self.next_rel = self.head_if_selected(GroupDirection::Incoming);
                        } else {
                            self.state = TraversalState::None;
                        }
                        continue;
                    }
                    if self.next_rel != NULL_REFERENCE {
                        if self.step_chain()? {
                            return Ok(true);
                        }
                        continue;
                    }
                    match self.state {
                        TraversalState::GroupIncoming => {
                            self.state = TraversalState::GroupOutgoing;
                            self.next_rel = self.head_if_selected(GroupDirection::Outgoing);
                        }
                        TraversalState::GroupOutgoing => {
                            self.state = TraversalState::GroupLoop;
                            self.next_rel = self.head_if_selected(GroupDirection::Loop);
                        }
                        _ => {
                            if self.load_next_group()? {
                                self.state = TraversalState::GroupIncoming;
                                self.next_rel = self.head_if_selected(GroupDirection::Incoming);
                            } else {
                                self.state = TraversalState::None;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Releases page cursors and buffered records.
    pub fn close(&mut self) {
        if let Some(mut page) = self.rel_page.take() {
            page.close();
        }
        if let Some(mut page) = self.group_page.take() {
            page.close();
        }
        self.buffer.clear();
        self.state = TraversalState::None;
        self.record.clear();
    }

    /// Id of the current relationship.
    pub fn id(&self) -> RelationshipId {
        RelationshipId(self.record.id)
    }

    /// Its type.
    pub fn rel_type(&self) -> RelTypeId {
        RelTypeId(self.record.rel_type)
    }

    /// Its start node.
    pub fn source(&self) -> NodeId {
        NodeId(self.record.first_node)
    }

    /// Its end node.
    pub fn target(&self) -> NodeId {
        NodeId(self.record.second_node)
    }

    /// The endpoint that is not the traversed node; the node itself for loops.
    pub fn other_node(&self) -> NodeId {
        if self.record.first_node == self.node {
            NodeId(self.record.second_node)
        } else {
            NodeId(self.record.first_node)
        }
    }

    /// Its first property record.
    pub fn properties_reference(&self) -> u64 {
        self.record.next_prop
    }

    /// The raw record.
    pub fn record(&self) -> &RelationshipRecord {
        &self.record
    }
}
