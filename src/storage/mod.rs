//! Record storage: fixed-size record files, their ids and cursors.
//!
//! Every entity lives in a record addressed by id. Links between records are
//! plain ids resolved through the owning [`RecordStore`], never references.

/// Record formats.
pub mod record;

/// Cursors over nodes, relationships, groups and properties.
pub mod cursor;

/// In-memory label scan and property indexes.
pub mod index;

/// Node label field encoding.
pub mod labels;

/// Property value encoding into blocks.
pub mod props;

mod counts;
mod dynamic;
mod ids;
mod meta;
mod store;
mod stores;
mod tokens;
mod values;

pub use counts::{CountsStore, COUNTS_FILE_NAME};
pub use dynamic::{concat, DynamicStore};
pub use ids::{IdGenerator, IdSequence, RenewableBatchIdSequence};
pub use meta::{MetaDataStore, MetaPosition, STORE_FORMAT_VERSION};
pub use store::RecordStore;
pub use stores::{RecordStores, StoreType};
pub use tokens::{TokenHolders, TokenKind};
pub use values::{ArrayValue, Crs, Point, TemporalValue, Value};
