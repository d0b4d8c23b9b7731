use std::collections::BTreeSet;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::{LabelId, NodeId};

/// Label change of one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelUpdate {
    /// Changed node.
    pub node: NodeId,
    /// Labels before the change.
    pub before: Vec<LabelId>,
    /// Labels after the change; empty when the node was deleted.
    pub after: Vec<LabelId>,
}

/// Nodes per label.
#[derive(Default)]
pub struct LabelScanIndex {
    labels: RwLock<FxHashMap<LabelId, BTreeSet<u64>>>,
}

impl LabelScanIndex {
    /// Applies a batch of updates under one write lock.
    pub fn apply(&self, updates: &[LabelUpdate]) {
        let mut labels = self.labels.write();
        for update in updates {
            for label in update.before.iter().filter(|l| !update.after.contains(l)) {
                if let Some(nodes) = labels.get_mut(label) {
                    nodes.remove(&update.node.0);
                    if nodes.is_empty() {
                        labels.remove(label);
                    }
                }
            }
            for label in &update.after {
                labels.entry(*label).or_default().insert(update.node.0);
            }
        }
    }

    /// Nodes carrying `label`, ascending.
    pub fn nodes_with_label(&self, label: LabelId) -> Vec<NodeId> {
        self.labels
            .read()
            .get(&label)
            .map(|nodes| nodes.iter().copied().map(NodeId).collect())
            .unwrap_or_default()
    }

    /// Whether `node` is indexed under `label`.
    pub fn contains(&self, label: LabelId, node: NodeId) -> bool {
        self.labels
            .read()
            .get(&label)
            .is_some_and(|nodes| nodes.contains(&node.0))
    }

    /// Empties the index before a rebuild.
    pub fn clear(&self) {
        self.labels.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_move_nodes_between_labels() {
        let index = LabelScanIndex::default();
        index.apply(&[
            LabelUpdate {
                node: NodeId(1),
                before: vec![],
                after: vec![LabelId(1), LabelId(2)],
            },
            LabelUpdate {
                node: NodeId(2),
                before: vec![],
                after: vec![LabelId(1)],
            },
        ]);
        index.apply(&[LabelUpdate {
            node: NodeId(1),
            before: vec![LabelId(1), LabelId(2)],
            after: vec![LabelId(2)],
        }]);
        assert_eq!(index.nodes_with_label(LabelId(1)), vec![NodeId(2)]);
        assert!(index.contains(LabelId(2), NodeId(1)));
        index.clear();
        assert!(index.nodes_with_label(LabelId(2)).is_empty());
    }
}
