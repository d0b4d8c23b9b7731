use std::collections::BTreeSet;

/// Additions and removals against a committed base set.
///
/// Adding something that was removed in the same transaction cancels the
/// removal and the other way round, so the two sides never overlap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffSets<T: Ord + Copy> {
    added: BTreeSet<T>,
    removed: BTreeSet<T>,
}

impl<T: Ord + Copy> Default for DiffSets<T> {
    fn default() -> Self {
        Self {
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }
}

impl<T: Ord + Copy> DiffSets<T> {
    /// Adds `item`, or cancels its removal.
    pub fn add(&mut self, item: T) {
        if !self.removed.remove(&item) {
            self.added.insert(item);
        }
    }

    /// Removes `item`, or cancels its addition.
    pub fn remove(&mut self, item: T) {
        if !self.added.remove(&item) {
            self.removed.insert(item);
        }
    }

    /// Drops `item` from both sides.
    pub fn forget(&mut self, item: T) {
        self.added.remove(&item);
        self.removed.remove(&item);
    }

    /// Whether `item` is on the added side.
    pub fn is_added(&self, item: T) -> bool {
        self.added.contains(&item)
    }

    /// Whether `item` is on the removed side.
    pub fn is_removed(&self, item: T) -> bool {
        self.removed.contains(&item)
    }

    /// Added items in order.
    pub fn added(&self) -> impl Iterator<Item = T> + '_ {
        self.added.iter().copied()
    }

    /// Removed items in order.
    pub fn removed(&self) -> impl Iterator<Item = T> + '_ {
        self.removed.iter().copied()
    }

    /// Whether both sides are empty.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Applies the diff to a committed base, returning the sorted result.
    pub fn apply(&self, base: impl IntoIterator<Item = T>) -> Vec<T> {
        let mut merged: BTreeSet<T> = base
            .into_iter()
            .filter(|item| !self.removed.contains(item))
            .collect();
        merged.extend(self.added.iter().copied());
        merged.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_cancel() {
        let mut diff = DiffSets::default();
        diff.add(1);
        diff.remove(1);
        assert!(diff.is_empty());
        diff.remove(2);
        diff.add(2);
        assert!(diff.is_empty());
        diff.add(3);
        diff.remove(4);
        assert_eq!(diff.apply([1, 4, 5]), vec![1, 3, 5]);
    }
}
