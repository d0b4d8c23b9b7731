//! Copy-on-write cache of schema rules.
//!
//! Readers clone an `Arc` to the current snapshot and never observe a partial
//! update: every change builds a complete new snapshot and swaps the pointer.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::types::{LabelId, PropertyKeyId, RelTypeId};

use super::{ConstraintDescriptor, EntityType, IndexDescriptor, SchemaDescriptor, SchemaRule};

/// An immutable view of every schema rule with its derived lookups.
#[derive(Clone, Debug, Default)]
pub struct SchemaSnapshot {
    by_id: FxHashMap<u64, SchemaRule>,
    by_schema: FxHashMap<SchemaDescriptor, Vec<u64>>,
    by_token: FxHashMap<(EntityType, u32), Vec<u64>>,
    by_property: FxHashMap<PropertyKeyId, Vec<u64>>,
}

impl SchemaSnapshot {
    fn insert(&mut self, rule: SchemaRule) {
        let id = rule.id();
        if self.by_id.contains_key(&id) {
            self.remove(id);
        }
        let schema = rule.schema().clone();
        self.by_schema.entry(schema.clone()).or_default().push(id);
        self.by_token
            .entry((schema.entity, schema.entity_token))
            .or_default()
            .push(id);
        for key in &schema.properties {
            let ids = self.by_property.entry(*key).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.by_id.insert(id, rule);
    }

    fn remove(&mut self, id: u64) -> Option<SchemaRule> {
        let rule = self.by_id.remove(&id)?;
        let schema = rule.schema();
        if let Some(ids) = self.by_schema.get_mut(schema) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_schema.remove(schema);
            }
        }
        let token = (schema.entity, schema.entity_token);
        if let Some(ids) = self.by_token.get_mut(&token) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_token.remove(&token);
            }
        }
        for key in &schema.properties {
            if let Some(ids) = self.by_property.get_mut(key) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.by_property.remove(key);
                }
            }
        }
        Some(rule)
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no rule is cached.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Rule with id `id`.
    pub fn rule(&self, id: u64) -> Option<&SchemaRule> {
        self.by_id.get(&id)
    }

    /// Every rule, ordered by id.
    pub fn rules(&self) -> Vec<&SchemaRule> {
        let mut rules: Vec<&SchemaRule> = self.by_id.values().collect();
        rules.sort_by_key(|rule| rule.id());
        rules
    }

    /// Rule named `name`.
    pub fn rule_by_name(&self, name: &str) -> Option<&SchemaRule> {
        self.by_id.values().find(|rule| rule.name() == name)
    }

    fn resolve<'s>(&'s self, ids: Option<&'s Vec<u64>>) -> impl Iterator<Item = &'s SchemaRule> + 's {
        ids.into_iter()
            .flatten()
            .filter_map(move |id| self.by_id.get(id))
    }

    fn indexes_in<'s>(rules: impl Iterator<Item = &'s SchemaRule> + 's) -> impl Iterator<Item = &'s IndexDescriptor> + 's {
        rules.filter_map(|rule| match rule {
            SchemaRule::Index(index) => Some(index),
            SchemaRule::Constraint(_) => None,
        })
    }

    fn constraints_in<'s>(
        rules: impl Iterator<Item = &'s SchemaRule> + 's,
    ) -> impl Iterator<Item = &'s ConstraintDescriptor> + 's {
        rules.filter_map(|rule| match rule {
            SchemaRule::Constraint(constraint) => Some(constraint),
            SchemaRule::Index(_) => None,
        })
    }

    /// Every index.
    pub fn indexes(&self) -> impl Iterator<Item = &IndexDescriptor> + '_ {
        Self::indexes_in(self.by_id.values())
    }

    /// Every constraint.
    pub fn constraints(&self) -> impl Iterator<Item = &ConstraintDescriptor> + '_ {
        Self::constraints_in(self.by_id.values())
    }

    /// Indexes on nodes with `label`.
    pub fn index_descriptors_for_label(&self, label: LabelId) -> impl Iterator<Item = &IndexDescriptor> + '_ {
        Self::indexes_in(self.resolve(self.by_token.get(&(EntityType::Node, label.0))))
    }

    /// Indexes on relationships of `rel_type`.
    pub fn index_descriptors_for_rel_type(
        &self,
        rel_type: RelTypeId,
    ) -> impl Iterator<Item = &IndexDescriptor> + '_ {
        Self::indexes_in(self.resolve(self.by_token.get(&(EntityType::Relationship, rel_type.0))))
    }

    /// Indexes that include `key`.
    pub fn index_descriptors_for_property(
        &self,
        key: PropertyKeyId,
    ) -> impl Iterator<Item = &IndexDescriptor> + '_ {
        Self::indexes_in(self.resolve(self.by_property.get(&key)))
    }

    /// The index over exactly `schema`.
    pub fn index_for_schema(&self, schema: &SchemaDescriptor) -> Option<&IndexDescriptor> {
        Self::indexes_in(self.resolve(self.by_schema.get(schema))).next()
    }

    /// Constraints over exactly `schema`.
    pub fn constraints_for_schema(
        &self,
        schema: &SchemaDescriptor,
    ) -> impl Iterator<Item = &ConstraintDescriptor> + '_ {
        Self::constraints_in(self.resolve(self.by_schema.get(schema)))
    }

    /// Constraints on nodes with `label`.
    pub fn constraints_for_label(&self, label: LabelId) -> impl Iterator<Item = &ConstraintDescriptor> + '_ {
        Self::constraints_in(self.resolve(self.by_token.get(&(EntityType::Node, label.0))))
    }

    /// Constraints on relationships of `rel_type`.
    pub fn constraints_for_rel_type(
        &self,
        rel_type: RelTypeId,
    ) -> impl Iterator<Item = &ConstraintDescriptor> + '_ {
        Self::constraints_in(self.resolve(self.by_token.get(&(EntityType::Relationship, rel_type.0))))
    }

    /// Constraints that include `key`.
    pub fn constraints_for_property(
        &self,
        key: PropertyKeyId,
    ) -> impl Iterator<Item = &ConstraintDescriptor> + '_ {
        Self::constraints_in(self.resolve(self.by_property.get(&key)))
    }

    /// Whether the four lookups agree with the rule set.
    pub fn is_consistent(&self) -> bool {
        let schema_total: usize = self.by_schema.values().map(Vec::len).sum();
        let token_total: usize = self.by_token.values().map(Vec::len).sum();
        let property_total: usize = self.by_property.values().map(Vec::len).sum();
        let expected_properties: usize = self
            .by_id
            .values()
            .map(|rule| {
                let mut keys = rule.schema().properties.clone();
                keys.sort_unstable();
                keys.dedup();
                keys.len()
            })
            .sum();
        self.by_schema.values().flatten().all(|id| self.by_id.contains_key(id))
            && self.by_token.values().flatten().all(|id| self.by_id.contains_key(id))
            && self.by_property.values().flatten().all(|id| self.by_id.contains_key(id))
            && schema_total == self.by_id.len()
            && token_total == self.by_id.len()
            && property_total == expected_properties
    }
}

/// The schema cache shared by readers and the apply pipeline.
#[derive(Default)]
pub struct SchemaCache {
    current: RwLock<Arc<SchemaSnapshot>>,
    writer: Mutex<()>,
}

impl SchemaCache {
    /// The current snapshot. Holding it never blocks writers.
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        Arc::clone(&self.current.read())
    }

    fn publish(&self, snapshot: SchemaSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    /// Replaces every rule.
    pub fn load(&self, rules: impl IntoIterator<Item = SchemaRule>) {
        let _writer = self.writer.lock();
        let mut snapshot = SchemaSnapshot::default();
        for rule in rules {
            snapshot.insert(rule);
        }
        debug!(rules = snapshot.len(), "schema_cache.load");
        self.publish(snapshot);
    }

    /// Adds or replaces one rule.
    pub fn add_schema_rule(&self, rule: SchemaRule) {
        let _writer = self.writer.lock();
        let mut snapshot = SchemaSnapshot::clone(&self.current.read());
        debug!(id = rule.id(), name = rule.name(), "schema_cache.add");
        snapshot.insert(rule);
        self.publish(snapshot);
    }

    /// Removes one rule.
    pub fn remove_schema_rule(&self, id: u64) {
        let _writer = self.writer.lock();
        let mut snapshot = SchemaSnapshot::clone(&self.current.read());
        if snapshot.remove(id).is_some() {
            debug!(id, "schema_cache.remove");
            self.publish(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConstraintType, IndexProvider};

    fn index(id: u64, label: u32, keys: &[u32]) -> SchemaRule {
        let keys: Vec<PropertyKeyId> = keys.iter().copied().map(PropertyKeyId).collect();
        SchemaRule::Index(IndexDescriptor {
            id,
            name: format!("index_{id}"),
            schema: SchemaDescriptor::for_label(LabelId(label), &keys),
            provider: IndexProvider::default(),
            unique: false,
            owning_constraint: None,
        })
    }

    #[test]
    fn lookups_follow_add_and_remove() {
        let cache = SchemaCache::default();
        cache.load([index(1, 1, &[1]), index(2, 1, &[1, 2])]);
        let before = cache.snapshot();
        cache.add_schema_rule(SchemaRule::Constraint(ConstraintDescriptor {
            id: 3,
            name: "unique_name".into(),
            schema: SchemaDescriptor::for_label(LabelId(2), &[PropertyKeyId(2)]),
            constraint_type: ConstraintType::Uniqueness,
            owned_index: None,
        }));
        let after = cache.snapshot();
        assert_eq!(before.len(), 2);
        assert_eq!(after.len(), 3);
        assert_eq!(after.index_descriptors_for_label(LabelId(1)).count(), 2);
        assert_eq!(after.constraints_for_label(LabelId(2)).count(), 1);
        assert_eq!(after.index_descriptors_for_property(PropertyKeyId(2)).count(), 1);
        assert_eq!(after.constraints_for_property(PropertyKeyId(2)).count(), 1);
        assert!(after
            .index_for_schema(&SchemaDescriptor::for_label(LabelId(1), &[PropertyKeyId(1)]))
            .is_some());
        assert!(before.is_consistent() && after.is_consistent());

        cache.remove_schema_rule(1);
        let removed = cache.snapshot();
        assert!(removed.rule(1).is_none());
        assert_eq!(removed.index_descriptors_for_property(PropertyKeyId(1)).count(), 1);
        assert!(removed.is_consistent());
        assert_eq!(after.index_descriptors_for_label(LabelId(1)).count(), 2);
    }
}
