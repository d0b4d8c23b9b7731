//! Property chain maintenance for nodes and relationships.

use crate::storage::props;
use crate::storage::record::{PropertyOwner, PropertyRecord, PropertyType};
use crate::storage::{IdSequence, Value};
use crate::types::{PenumbraError, PropertyKeyId, Result, NULL_REFERENCE};

use super::record_state::TransactionRecordState;

impl TransactionRecordState<'_> {
    fn property_mut(&mut self, id: u64) -> Result<&mut PropertyRecord> {
        self.properties.load(id, &self.stores.properties)
    }

    fn owner_head(&mut self, owner: PropertyOwner) -> Result<u64> {
        Ok(match owner {
            PropertyOwner::Node(id) => self.node_mut(id)?.next_prop,
            PropertyOwner::Relationship(id) => self.relationship_mut(id)?.next_prop,
        })
    }

    fn set_owner_head(&mut self, owner: PropertyOwner, head: u64) -> Result<()> {
        match owner {
            PropertyOwner::Node(id) => self.node_mut(id)?.next_prop = head,
            PropertyOwner::Relationship(id) => self.relationship_mut(id)?.next_prop = head,
        }
        Ok(())
    }

    fn property_chain(&mut self, head: u64) -> Result<Vec<u64>> {
        let limit = self.stores.properties.high_id() + self.properties.len() as u64 + 1;
        let mut chain = Vec::new();
        let mut next = head;
        while next != NULL_REFERENCE {
            if chain.len() as u64 > limit {
                return Err(PenumbraError::CorruptionDetail(format!(
                    "property chain starting at {head} is cyclic"
                )));
            }
            chain.push(next);
            next = self.property_mut(next)?.next_prop;
        }
        Ok(chain)
    }

    /// Takes the block for `key` out of record `id`, moving it to the
    /// record's removed blocks with its value records marked unused.
    fn free_block(&mut self, id: u64, key: PropertyKeyId) -> Result<bool> {
        let stores = self.stores;
        let record = self.properties.load(id, &stores.properties)?;
        let Some(mut block) = record.remove_block(key) else {
            return Ok(false);
        };
        if let Some(pointer) = block.dynamic_pointer() {
            if block.value_records.is_empty() {
                let store = match block.property_type() {
                    Some(PropertyType::Array) => &stores.arrays,
                    _ => &stores.strings,
                };
                block.value_records = store.load_chain(pointer)?;
            }
            for value in &mut block.value_records {
                value.in_use = false;
            }
        }
        record.removed_blocks.push(block);
        Ok(true)
    }

    fn unlink_property_record(&mut self, owner: PropertyOwner, id: u64) -> Result<()> {
        let record = self.property_mut(id)?;
        let (prev, next) = (record.prev_prop, record.next_prop);
        record.in_use = false;
        if prev == NULL_REFERENCE {
            self.set_owner_head(owner, next)?;
        } else {
            self.property_mut(prev)?.next_prop = next;
        }
        if next != NULL_REFERENCE {
            self.property_mut(next)?.prev_prop = prev;
        }
        Ok(())
    }

    /// Sets `key` on `owner`, replacing any previous value. The new block
    /// stays in the record of the old one when it fits, then goes into the
    /// first record with room, and otherwise into a new head record.
    pub(crate) fn property_set(
        &mut self,
        owner: PropertyOwner,
        key: PropertyKeyId,
        value: &Value,
    ) -> Result<()> {
        let stores = self.stores;
        let block = props::encode_value(
            key,
            value,
            &stores.strings,
            &mut self.ids.strings,
            &stores.arrays,
            &mut self.ids.arrays,
        )?;
        let head = self.owner_head(owner)?;
        let chain = self.property_chain(head)?;

        let mut candidates = Vec::with_capacity(chain.len() + 1);
        for id in chain.iter().copied() {
            if self.free_block(id, key)? {
                candidates.push(id);
                break;
            }
        }
        candidates.extend(chain.iter().copied());
        for id in candidates {
            let record = self.property_mut(id)?;
            if record.free_words() >= block.size() {
                record.add_block(block);
                record.owner = Some(owner);
                return Ok(());
            }
        }

        let id = self.ids.properties.next_id();
        let record = self.properties.create(id);
        record.next_prop = head;
        record.owner = Some(owner);
        record.add_block(block);
        if head != NULL_REFERENCE {
            self.property_mut(head)?.prev_prop = id;
        }
        self.set_owner_head(owner, id)
    }

    /// Removes `key` from `owner`, returning whether it was set. A record
    /// left without blocks is unlinked from the chain.
    pub(crate) fn property_remove(&mut self, owner: PropertyOwner, key: PropertyKeyId) -> Result<bool> {
        let head = self.owner_head(owner)?;
        for id in self.property_chain(head)? {
            if !self.free_block(id, key)? {
                continue;
            }
            let record = self.property_mut(id)?;
            record.owner = Some(owner);
            if record.blocks.is_empty() {
                self.unlink_property_record(owner, id)?;
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Frees every record of the chain starting at `head` along with the
    /// dynamic records of its values.
    pub(crate) fn delete_property_chain(&mut self, owner: PropertyOwner, head: u64) -> Result<()> {
        for id in self.property_chain(head)? {
            let keys: Vec<PropertyKeyId> = self
                .property_mut(id)?
                .blocks
                .iter()
                .map(|block| block.key())
                .collect();
            for key in keys {
                self.free_block(id, key)?;
            }
            let record = self.property_mut(id)?;
            record.in_use = false;
            record.owner = Some(owner);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::command::Command;
    use crate::engine::context::CommandCreationContext;
    use crate::primitives::pager::PageCache;
    use crate::storage::RecordStores;
    use crate::types::KernelVersion;

    use super::*;

    fn values(state: &TransactionRecordState<'_>, stores: &RecordStores, node: u64) -> Vec<(u32, Value)> {
        let mut out = Vec::new();
        let mut next = state.nodes.get(node).unwrap().next_prop;
        while next != NULL_REFERENCE {
            let record = state.properties.get(next).unwrap();
            for block in &record.blocks {
                let value = props::decode_value(block, &stores.strings, &stores.arrays).unwrap();
                out.push((block.key().0, value));
            }
            next = record.next_prop;
        }
        out.sort_by_key(|(key, _)| *key);
        out
    }

    #[test]
    fn set_replace_and_remove() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = PageCache::new(4096, 64);
        let stores = RecordStores::open(dir.path(), &cache, 16, KernelVersion::LATEST)?;
        let mut ids = CommandCreationContext::new(&stores, 8);
        let mut state = TransactionRecordState::new(&stores, &mut ids, 50);
        let owner = PropertyOwner::Node(0);
        state.node_create(0);
        for key in 0..5u32 {
            state.property_set(owner, PropertyKeyId(key), &Value::Double(key as f64))?;
        }
        state.property_set(owner, PropertyKeyId(2), &Value::String("x".repeat(40)))?;
        let found = values(&state, &stores, 0);
        assert_eq!(found.len(), 5);
        assert_eq!(found[2].1, Value::String("x".repeat(40)));

        assert!(state.property_remove(owner, PropertyKeyId(4))?);
        assert!(!state.property_remove(owner, PropertyKeyId(9))?);
        assert_eq!(values(&state, &stores, 0).len(), 4);

        let commands = state.extract_commands();
        let removed: usize = commands
            .iter()
            .filter_map(|command| match command {
                Command::Property(change) => Some(change.after.removed_blocks.len()),
                _ => None,
            })
            .sum();
        assert_eq!(removed, 2);
        assert!(commands.iter().all(|command| match command {
            Command::Property(change) => change.after.owner == Some(owner),
            _ => true,
        }));
        Ok(())
    }
}
