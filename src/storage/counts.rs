//! Entity counts per label and per relationship type.
//!
//! Counts live in memory and are written to a JSON file at checkpoint along
//! with the id of the last transaction they reflect, so recovery can skip
//! deltas that are already included.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{LabelId, PenumbraError, RelTypeId, Result, TxId};

/// File name of the persisted counts.
pub const COUNTS_FILE_NAME: &str = "penumbra.counts.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CountsFile {
    tx_id: u64,
    nodes: Vec<CountEntry>,
    relationships: Vec<CountEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CountEntry {
    /// Token id, or `None` for the count over every entity.
    token: Option<u32>,
    count: i64,
}

#[derive(Default)]
struct CountsState {
    tx_id: u64,
    nodes: FxHashMap<Option<u32>, i64>,
    relationships: FxHashMap<Option<u32>, i64>,
}

/// Node and relationship counts.
pub struct CountsStore {
    path: PathBuf,
    state: Mutex<CountsState>,
}

impl CountsStore {
    /// Loads counts from `dir`, starting empty when no file exists.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(COUNTS_FILE_NAME);
        let mut state = CountsState::default();
        if path.exists() {
            let raw = fs::read(&path)?;
            let file: CountsFile = serde_json::from_slice(&raw)
                .map_err(|err| PenumbraError::CorruptionDetail(format!("counts file: {err}")))?;
            state.tx_id = file.tx_id;
            state.nodes = file.nodes.into_iter().map(|e| (e.token, e.count)).collect();
            state.relationships = file
                .relationships
                .into_iter()
                .map(|e| (e.token, e.count))
                .collect();
        }
        debug!(path = %path.display(), tx_id = state.tx_id, "counts.opened");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Transaction the counts reflect.
    pub fn tx_id(&self) -> TxId {
        TxId(self.state.lock().tx_id)
    }

    /// Records that every delta up to `tx` is included.
    pub fn set_tx_id(&self, tx: TxId) {
        let mut state = self.state.lock();
        state.tx_id = state.tx_id.max(tx.0);
    }

    /// Adjusts the node count for `label`, where `None` counts every node.
    pub fn increment_node_count(&self, label: Option<LabelId>, delta: i64) {
        *self
            .state
            .lock()
            .nodes
            .entry(label.map(|l| l.0))
            .or_default() += delta;
    }

    /// Adjusts the relationship count for `rel_type`, where `None` counts every relationship.
    pub fn increment_relationship_count(&self, rel_type: Option<RelTypeId>, delta: i64) {
        *self
            .state
            .lock()
            .relationships
            .entry(rel_type.map(|t| t.0))
            .or_default() += delta;
    }

    /// Nodes with `label`, or every node.
    pub fn node_count(&self, label: Option<LabelId>) -> i64 {
        self.state
            .lock()
            .nodes
            .get(&label.map(|l| l.0))
            .copied()
            .unwrap_or(0)
    }

    /// Relationships of `rel_type`, or every relationship.
    pub fn relationship_count(&self, rel_type: Option<RelTypeId>) -> i64 {
        self.state
            .lock()
            .relationships
            .get(&rel_type.map(|t| t.0))
            .copied()
            .unwrap_or(0)
    }

    /// Resets every count.
    pub fn clear(&self, tx: TxId) {
        let mut state = self.state.lock();
        *state = CountsState::default();
        state.tx_id = tx.0;
    }

    /// Writes the counts to disk, replacing the previous file atomically.
    pub fn checkpoint(&self) -> Result<()> {
        let file = {
            let state = self.state.lock();
            let entries = |map: &FxHashMap<Option<u32>, i64>| {
                let mut out: Vec<CountEntry> = map
                    .iter()
                    .filter(|(_, count)| **count != 0)
                    .map(|(token, count)| CountEntry {
                        token: *token,
                        count: *count,
                    })
                    .collect();
                out.sort_by_key(|e| e.token);
                out
            };
            CountsFile {
                tx_id: state.tx_id,
                nodes: entries(&state.nodes),
                relationships: entries(&state.relationships),
            }
        };
        let raw = serde_json::to_vec_pretty(&file)
            .map_err(|err| PenumbraError::CorruptionDetail(format!("counts file: {err}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        debug!(tx_id = file.tx_id, "counts.checkpoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_survive_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let counts = CountsStore::open(dir.path())?;
        counts.increment_node_count(None, 3);
        counts.increment_node_count(Some(LabelId(1)), 2);
        counts.increment_node_count(Some(LabelId(1)), -1);
        counts.increment_relationship_count(Some(RelTypeId(4)), 5);
        counts.set_tx_id(TxId(12));
        counts.checkpoint()?;

        let reopened = CountsStore::open(dir.path())?;
        assert_eq!(reopened.tx_id(), TxId(12));
        assert_eq!(reopened.node_count(None), 3);
        assert_eq!(reopened.node_count(Some(LabelId(1))), 1);
        assert_eq!(reopened.relationship_count(Some(RelTypeId(4))), 5);
        assert_eq!(reopened.relationship_count(None), 0);
        Ok(())
    }
}
