//! In-memory label scan and property indexes.
//!
//! Both are rebuilt from the stores at startup and kept current by the
//! index-update applier, which derives its updates from record changes.

mod label_scan;
mod property;

pub use label_scan::{LabelScanIndex, LabelUpdate};
pub use property::{composite_key, IndexUpdate, PropertyIndexes};
