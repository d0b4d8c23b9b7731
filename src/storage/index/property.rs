use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::schema::IndexDescriptor;
use crate::storage::values::Value;

/// Key of a value tuple in a property index.
pub fn composite_key(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        value.index_key(&mut out);
    }
    out
}

/// New state of one entity in one index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexUpdate {
    /// Index rule id.
    pub index_id: u64,
    /// Node or relationship id.
    pub entity: u64,
    /// Indexed values after the change, or `None` when the entity left the index.
    pub after: Option<Vec<Value>>,
}

struct PropertyIndex {
    descriptor: IndexDescriptor,
    entries: BTreeMap<Vec<u8>, BTreeSet<u64>>,
    by_entity: FxHashMap<u64, Vec<u8>>,
}

impl PropertyIndex {
    fn remove_entity(&mut self, entity: u64) {
        if let Some(key) = self.by_entity.remove(&entity) {
            if let Some(entities) = self.entries.get_mut(&key) {
                entities.remove(&entity);
                if entities.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }
}

/// Every property index, keyed by rule id.
#[derive(Default)]
pub struct PropertyIndexes {
    indexes: RwLock<FxHashMap<u64, PropertyIndex>>,
}

impl PropertyIndexes {
    /// Registers an empty index for `descriptor`; an existing index is kept.
    pub fn create(&self, descriptor: &IndexDescriptor) {
        let mut indexes = self.indexes.write();
        indexes.entry(descriptor.id).or_insert_with(|| {
            debug!(id = descriptor.id, name = %descriptor.name, "index.created");
            PropertyIndex {
                descriptor: descriptor.clone(),
                entries: BTreeMap::new(),
                by_entity: FxHashMap::default(),
            }
        });
    }

    /// Removes index `id`; unknown ids are ignored.
    pub fn drop_index(&self, id: u64) {
        if self.indexes.write().remove(&id).is_some() {
            debug!(id, "index.dropped");
        }
    }

    /// Whether index `id` is online.
    pub fn exists(&self, id: u64) -> bool {
        self.indexes.read().contains_key(&id)
    }

    /// Applies updates; updates for unknown indexes are ignored.
    pub fn apply(&self, updates: &[IndexUpdate]) {
        let mut indexes = self.indexes.write();
        for update in updates {
            let Some(index) = indexes.get_mut(&update.index_id) else {
                continue;
            };
            index.remove_entity(update.entity);
            if let Some(values) = &update.after {
                let key = composite_key(values);
                index.entries.entry(key.clone()).or_default().insert(update.entity);
                index.by_entity.insert(update.entity, key);
            }
        }
    }

    /// Entities whose indexed values equal `values`.
    pub fn lookup(&self, index_id: u64, values: &[Value]) -> Vec<u64> {
        let key = composite_key(values);
        self.indexes
            .read()
            .get(&index_id)
            .and_then(|index| index.entries.get(&key))
            .map(|entities| entities.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of entities in the index.
    pub fn entity_count(&self, index_id: u64) -> usize {
        self.indexes
            .read()
            .get(&index_id)
            .map_or(0, |index| index.by_entity.len())
    }

    /// Descriptors of every registered index.
    pub fn descriptors(&self) -> Vec<IndexDescriptor> {
        let mut out: Vec<IndexDescriptor> = self
            .indexes
            .read()
            .values()
            .map(|index| index.descriptor.clone())
            .collect();
        out.sort_by_key(|d| d.id);
        out
    }

    /// Drops every index.
    pub fn clear(&self) {
        self.indexes.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IndexProvider, SchemaDescriptor};
    use crate::types::{LabelId, PropertyKeyId};

    #[test]
    fn entities_move_between_keys() {
        let indexes = PropertyIndexes::default();
        indexes.create(&IndexDescriptor {
            id: 1,
            name: "by_name".into(),
            schema: SchemaDescriptor::for_label(LabelId(1), &[PropertyKeyId(1)]),
            provider: IndexProvider::default(),
            unique: false,
            owning_constraint: None,
        });
        indexes.apply(&[
            IndexUpdate { index_id: 1, entity: 10, after: Some(vec![Value::from("a")]) },
            IndexUpdate { index_id: 1, entity: 11, after: Some(vec![Value::from("a")]) },
            IndexUpdate { index_id: 9, entity: 11, after: Some(vec![Value::from("a")]) },
        ]);
        assert_eq!(indexes.lookup(1, &[Value::from("a")]), vec![10, 11]);
        indexes.apply(&[
            IndexUpdate { index_id: 1, entity: 10, after: Some(vec![Value::Long(3)]) },
            IndexUpdate { index_id: 1, entity: 11, after: None },
        ]);
        assert!(indexes.lookup(1, &[Value::from("a")]).is_empty());
        assert_eq!(indexes.lookup(1, &[Value::Int(3)]), vec![10]);
        assert_eq!(indexes.entity_count(1), 1);
        indexes.drop_index(1);
        assert!(!indexes.exists(1));
    }
}
