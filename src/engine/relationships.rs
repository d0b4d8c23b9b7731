//! Relationship chain maintenance.
//!
//! A sparse node threads all of its relationships through one doubly-linked
//! chain starting at `next_rel`. A dense node points at a chain of groups, one
//! per type ordered by type id, each heading an outgoing, an incoming and a
//! loop chain. New relationships are always linked in at the head; the head
//! record's `prev` for that side holds the chain length.

use tracing::debug;

use crate::storage::record::{GroupDirection, PropertyOwner, RelationshipRecord, Side};
use crate::storage::IdSequence;
use crate::types::{PenumbraError, RelTypeId, Result, NULL_REFERENCE};

use super::record_state::TransactionRecordState;

fn side_for(record: &RelationshipRecord, node: u64) -> Result<Side> {
    record.side_of(node).ok_or_else(|| {
        PenumbraError::CorruptionDetail(format!(
            "relationship {} in the chain of node {node} does not touch it",
            record.id
        ))
    })
}

impl TransactionRecordState<'_> {
    pub(crate) fn relationship_create(
        &mut self,
        id: u64,
        rel_type: u32,
        start: u64,
        end: u64,
    ) -> Result<()> {
        self.node_mut(start)?;
        self.node_mut(end)?;
        let record = self.relationships.create(id);
        record.rel_type = rel_type;
        record.first_node = start;
        record.second_node = end;
        self.connect(start, id)?;
        if end != start {
            self.connect(end, id)?;
        }
        self.count_relationships(None, 1);
        self.count_relationships(Some(RelTypeId(rel_type)), 1);
        Ok(())
    }

    /// Unlinks a relationship from both chains and frees it with its
    /// properties. The record keeps its pointers so that concurrent chain
    /// walks can step over it.
    pub(crate) fn relationship_delete(&mut self, id: u64) -> Result<()> {
        let record = self.relationship_mut(id)?;
        let (rel_type, first, second, properties) =
            (record.rel_type, record.first_node, record.second_node, record.next_prop);
        self.disconnect(first, id)?;
        if second != first {
            self.disconnect(second, id)?;
        }
        self.relationship_mut(id)?.in_use = false;
        self.count_relationships(None, -1);
        self.count_relationships(Some(RelTypeId(rel_type)), -1);
        self.delete_property_chain(PropertyOwner::Relationship(id), properties)
    }

    fn connect(&mut self, node: u64, rel: u64) -> Result<()> {
        if self.node_mut(node)?.dense {
            return self.connect_to_group(node, rel);
        }
        let head = self.node_mut(node)?.next_rel;
        let length = self.insert_at_head(node, rel, head)?;
        self.node_mut(node)?.next_rel = rel;
        if length > self.dense_node_threshold {
            self.convert_to_dense(node)?;
        }
        Ok(())
    }

    /// Links `rel` in front of the chain of `node` headed by `head` and
    /// returns the new chain length.
    fn insert_at_head(&mut self, node: u64, rel: u64, head: u64) -> Result<u64> {
        let length = if head == NULL_REFERENCE {
            0
        } else {
            let current = self.relationship_mut(head)?;
            let side = side_for(current, node)?;
            let length = current.prev(side);
            current.set_first_in_chain(side, false);
            current.set_prev(side, rel);
            length
        };
        let record = self.relationship_mut(rel)?;
        let side = side_for(record, node)?;
        record.set_next(side, head);
        record.set_prev(side, length + 1);
        record.set_first_in_chain(side, true);
        Ok(length + 1)
    }

    fn connect_to_group(&mut self, node: u64, rel: u64) -> Result<()> {
        let record = self.relationship_mut(rel)?;
        let (rel_type, first, second) = (record.rel_type, record.first_node, record.second_node);
        let group = self.find_or_create_group(node, rel_type)?;
        let direction = GroupDirection::of(node, first, second);
        let head = self.group_mut(group)?.head(direction);
        self.insert_at_head(node, rel, head)?;
        self.group_mut(group)?.set_head(direction, rel);
        Ok(())
    }

    /// Moves every relationship of a sparse node into per-type groups,
    /// keeping their relative order.
    fn convert_to_dense(&mut self, node: u64) -> Result<()> {
        // A chain can hold every stored relationship plus the ones this
        // transaction created.
        let limit = self.stores.relationships.high_id() + self.relationships.len() as u64 + 1;
        let mut chain = Vec::new();
        let mut next = self.node_mut(node)?.next_rel;
        while next != NULL_REFERENCE {
            if chain.len() as u64 > limit {
                return Err(PenumbraError::CorruptionDetail(format!(
                    "relationship chain of node {node} is cyclic"
                )));
            }
            chain.push(next);
            let record = self.relationship_mut(next)?;
            next = record.next(side_for(record, node)?);
        }
        let record = self.node_mut(node)?;
        record.dense = true;
        record.next_rel = NULL_REFERENCE;
        for rel in chain.iter().rev().copied() {
            let record = self.relationship_mut(rel)?;
            let side = side_for(record, node)?;
            record.set_prev(side, NULL_REFERENCE);
            record.set_next(side, NULL_REFERENCE);
            record.set_first_in_chain(side, false);
            self.connect_to_group(node, rel)?;
        }
        self.dense_conversions += 1;
        debug!(node, relationships = chain.len(), "record_state.dense_conversion");
        Ok(())
    }

    /// Finds the group of `rel_type`, returning it together with the last
    /// group of a smaller type.
    fn locate_group(&mut self, node: u64, rel_type: u32) -> Result<(Option<u64>, Option<u64>)> {
        let limit = self.stores.groups.high_id() + 1;
        let mut steps = 0u64;
        let mut previous = None;
        let mut current = self.node_mut(node)?.next_rel;
        while current != NULL_REFERENCE {
            steps += 1;
            if steps > limit {
                return Err(PenumbraError::CorruptionDetail(format!(
                    "group chain of node {node} is cyclic"
                )));
            }
            let group = self.group_mut(current)?;
            if group.rel_type == rel_type {
                return Ok((previous, Some(current)));
            }
            if group.rel_type > rel_type {
                break;
            }
            previous = Some(current);
            current = group.next;
        }
        Ok((previous, None))
    }

    fn find_or_create_group(&mut self, node: u64, rel_type: u32) -> Result<u64> {
        let (previous, found) = self.locate_group(node, rel_type)?;
        if let Some(id) = found {
            return Ok(id);
        }
        let id = self.ids.groups.next_id();
        let next = match previous {
            Some(previous) => self.group_mut(previous)?.next,
            None => self.node_mut(node)?.next_rel,
        };
        let group = self.groups.create(id);
        group.rel_type = rel_type;
        group.owning_node = node;
        group.next = next;
        match previous {
            Some(previous) => self.group_mut(previous)?.next = id,
            None => self.node_mut(node)?.next_rel = id,
        }
        Ok(id)
    }

    fn unlink_group(&mut self, node: u64, group: u64) -> Result<()> {
        let next = self.group_mut(group)?.next;
        let (previous, _) = {
            let rel_type = self.group_mut(group)?.rel_type;
            self.locate_group(node, rel_type)?
        };
        match previous {
            Some(previous) => self.group_mut(previous)?.next = next,
            None => self.node_mut(node)?.next_rel = next,
        }
        self.group_mut(group)?.in_use = false;
        Ok(())
    }

    fn disconnect(&mut self, node: u64, rel: u64) -> Result<()> {
        let record = self.relationship_mut(rel)?;
        let side = side_for(record, node)?;
        let (prev, next, first) = (record.prev(side), record.next(side), record.is_first_in_chain(side));
        let (rel_type, first_node, second_node) = (record.rel_type, record.first_node, record.second_node);
        let direction = GroupDirection::of(node, first_node, second_node);
        let group = if self.node_mut(node)?.dense {
            match self.locate_group(node, rel_type)? {
                (_, Some(group)) => Some(group),
                (_, None) => {
                    return Err(PenumbraError::CorruptionDetail(format!(
                        "dense node {node} has no group for type {rel_type}"
                    )))
                }
            }
        } else {
            None
        };

        if first {
            match group {
                Some(group) => self.group_mut(group)?.set_head(direction, next),
                None => self.node_mut(node)?.next_rel = next,
            }
            if next != NULL_REFERENCE {
                let successor = self.relationship_mut(next)?;
                let side = side_for(successor, node)?;
                successor.set_first_in_chain(side, true);
                successor.set_prev(side, prev.saturating_sub(1));
            }
        } else {
            let predecessor = self.relationship_mut(prev)?;
            let side = side_for(predecessor, node)?;
            predecessor.set_next(side, next);
            if next != NULL_REFERENCE {
                let successor = self.relationship_mut(next)?;
                let side = side_for(successor, node)?;
                successor.set_prev(side, prev);
            }
            let head = match group {
                Some(group) => self.group_mut(group)?.head(direction),
                None => self.node_mut(node)?.next_rel,
            };
            let head = self.relationship_mut(head)?;
            let side = side_for(head, node)?;
            head.set_prev(side, head.prev(side).saturating_sub(1));
        }

        if let Some(group) = group {
            if self.group_mut(group)?.is_empty() {
                self.unlink_group(node, group)?;
            }
        }
        Ok(())
    }
}
