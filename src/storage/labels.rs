//! The node label field.
//!
//! Up to three labels below 2^20 are packed into the field itself, with the
//! count in bits 60..63. Anything else is written to the label store as a
//! sorted list and the field holds the first record id with bit 63 set.

use crate::primitives::bytes::buf::Reader;
use crate::types::{LabelId, PenumbraError, Result};

use super::dynamic::{concat, DynamicStore};
use super::ids::IdSequence;
use super::record::{DynamicRecord, NodeRecord};

const DYNAMIC_FLAG: u64 = 1 << 63;
const INLINE_BITS: u32 = 20;
const INLINE_MAX: usize = 3;
const INLINE_MASK: u64 = (1 << INLINE_BITS) - 1;

/// Whether the field points into the label store.
pub fn is_dynamic(field: u64) -> bool {
    field & DYNAMIC_FLAG != 0
}

/// First label store record of a dynamic field.
pub fn dynamic_pointer(field: u64) -> u64 {
    field & !DYNAMIC_FLAG
}

/// Packs `labels` inline when they fit.
pub fn encode_inline(labels: &[LabelId]) -> Option<u64> {
    if labels.len() > INLINE_MAX || labels.iter().any(|l| l.0 as u64 > INLINE_MASK) {
        return None;
    }
    let mut field = (labels.len() as u64) << 60;
    for (i, label) in labels.iter().enumerate() {
        field |= (label.0 as u64) << (i as u32 * INLINE_BITS);
    }
    Some(field)
}

/// Unpacks an inline field.
pub fn decode_inline(field: u64) -> Vec<LabelId> {
    let count = ((field >> 60) & 0x7) as usize;
    (0..count.min(INLINE_MAX))
        .map(|i| LabelId(((field >> (i as u32 * INLINE_BITS)) & INLINE_MASK) as u32))
        .collect()
}

fn to_bytes(labels: &[LabelId]) -> Vec<u8> {
    labels.iter().flat_map(|l| l.0.to_be_bytes()).collect()
}

fn from_bytes(bytes: &[u8]) -> Result<Vec<LabelId>> {
    if bytes.len() % 4 != 0 {
        return Err(PenumbraError::Corruption("label list length not a multiple of 4"));
    }
    let mut reader = Reader::new(bytes);
    (0..bytes.len() / 4).map(|_| Ok(LabelId(reader.u32()?))).collect()
}

/// Labels of `node`, using its attached label records when present and the store otherwise.
pub fn node_labels(node: &NodeRecord, store: &DynamicStore) -> Result<Vec<LabelId>> {
    if !is_dynamic(node.labels) {
        return Ok(decode_inline(node.labels));
    }
    let pointer = dynamic_pointer(node.labels);
    let attached: Vec<DynamicRecord> = node
        .dynamic_labels
        .iter()
        .filter(|r| r.in_use)
        .cloned()
        .collect();
    if attached.iter().any(|r| r.id == pointer && r.start) {
        return from_bytes(&concat(&attached));
    }
    from_bytes(&store.read_chain(pointer)?)
}

/// Replaces the labels of `node`. Previously attached label records are kept
/// but marked unused; new ones are appended when the set does not fit inline.
pub fn set_node_labels(
    node: &mut NodeRecord,
    labels: &[LabelId],
    store: &DynamicStore,
    ids: &mut dyn IdSequence,
) -> Result<()> {
    let mut sorted = labels.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if is_dynamic(node.labels) && !node.dynamic_labels.iter().any(|r| r.in_use) {
        node.dynamic_labels = store.load_chain(dynamic_pointer(node.labels))?;
    }
    for record in &mut node.dynamic_labels {
        record.in_use = false;
    }
    match encode_inline(&sorted) {
        Some(field) => node.labels = field,
        None => {
            let records = store.allocate_records(&to_bytes(&sorted), ids);
            node.labels = DYNAMIC_FLAG | records[0].id;
            node.dynamic_labels.extend(records);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::MemFileIo;
    use crate::primitives::pager::PageCache;
    use crate::storage::ids::RenewableBatchIdSequence;
    use crate::storage::record::Record;
    use std::sync::Arc;

    #[test]
    fn inline_labels_roundtrip() {
        let labels = vec![LabelId(1), LabelId(5), LabelId((1 << 20) - 1)];
        let field = encode_inline(&labels).unwrap();
        assert!(!is_dynamic(field));
        assert_eq!(decode_inline(field), labels);
        assert!(encode_inline(&[LabelId(1 << 20)]).is_none());
        assert!(encode_inline(&[LabelId(1), LabelId(2), LabelId(3), LabelId(4)]).is_none());
        assert!(decode_inline(0).is_empty());
    }

    #[test]
    fn many_labels_move_to_the_label_store() -> Result<()> {
        let cache = PageCache::new(1024, 4);
        let store = DynamicStore::open(cache.map_io("labels", Arc::new(MemFileIo::new()))?, 8)?;
        let mut ids = RenewableBatchIdSequence::new(Arc::clone(store.records().ids()), 4);
        let mut node = NodeRecord::new(1);
        let labels: Vec<LabelId> = (0..7).rev().map(LabelId).collect();
        set_node_labels(&mut node, &labels, &store, &mut ids)?;
        assert!(is_dynamic(node.labels));
        let mut expected = labels.clone();
        expected.sort();
        assert_eq!(node_labels(&node, &store)?, expected);

        store.write_records(&node.dynamic_labels)?;
        node.dynamic_labels.clear();
        assert_eq!(node_labels(&node, &store)?, expected);

        set_node_labels(&mut node, &[LabelId(2)], &store, &mut ids)?;
        assert!(!is_dynamic(node.labels));
        assert!(node.dynamic_labels.iter().all(|r| !r.in_use));
        assert_eq!(node.dynamic_labels.len(), 4);
        assert_eq!(node_labels(&node, &store)?, vec![LabelId(2)]);
        Ok(())
    }
}
