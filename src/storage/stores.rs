//! The full set of record stores backing one database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::primitives::pager::{PageCache, PagedFile};
use crate::types::{KernelVersion, Result};

use super::dynamic::DynamicStore;
use super::meta::MetaDataStore;
use super::record::{
    NodeRecord, PropertyRecord, RelationshipGroupRecord, RelationshipRecord, SchemaRecord,
    TokenRecord,
};
use super::store::RecordStore;
use super::tokens::TokenKind;

/// Every store file of a database.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StoreType {
    /// Node records.
    Node,
    /// Node label overflow lists.
    NodeLabels,
    /// Relationship records.
    Relationship,
    /// Relationship group records of dense nodes.
    RelationshipGroup,
    /// Property records.
    Property,
    /// Long string values.
    PropertyStrings,
    /// Array values.
    PropertyArrays,
    /// Label tokens.
    LabelToken,
    /// Relationship type tokens.
    RelationshipTypeToken,
    /// Property key tokens.
    PropertyKeyToken,
    /// Token names.
    TokenNames,
    /// Schema rules.
    Schema,
    /// Serialised schema rules.
    SchemaPayloads,
    /// Metadata.
    MetaData,
}

impl StoreType {
    /// Every store in open order.
    pub const ALL: [StoreType; 14] = [
        StoreType::Node,
        StoreType::NodeLabels,
        StoreType::Relationship,
        StoreType::RelationshipGroup,
        StoreType::Property,
        StoreType::PropertyStrings,
        StoreType::PropertyArrays,
        StoreType::LabelToken,
        StoreType::RelationshipTypeToken,
        StoreType::PropertyKeyToken,
        StoreType::TokenNames,
        StoreType::Schema,
        StoreType::SchemaPayloads,
        StoreType::MetaData,
    ];

    /// File name of the store inside the database directory.
    pub fn file_name(self) -> &'static str {
        match self {
            StoreType::Node => "penumbra.nodestore.db",
            StoreType::NodeLabels => "penumbra.nodestore.db.labels",
            StoreType::Relationship => "penumbra.relationshipstore.db",
            StoreType::RelationshipGroup => "penumbra.relationshipgroupstore.db",
            StoreType::Property => "penumbra.propertystore.db",
            StoreType::PropertyStrings => "penumbra.propertystore.db.strings",
            StoreType::PropertyArrays => "penumbra.propertystore.db.arrays",
            StoreType::LabelToken => "penumbra.labeltokenstore.db",
            StoreType::RelationshipTypeToken => "penumbra.relationshiptypestore.db",
            StoreType::PropertyKeyToken => "penumbra.propertystore.db.index",
            StoreType::TokenNames => "penumbra.tokennames.db",
            StoreType::Schema => "penumbra.schemastore.db",
            StoreType::SchemaPayloads => "penumbra.schemastore.db.payloads",
            StoreType::MetaData => "penumbra.metadatastore.db",
        }
    }
}

/// Open handles to every store.
pub struct RecordStores {
    dir: PathBuf,
    files: Vec<Arc<PagedFile>>,
    /// Nodes.
    pub nodes: RecordStore<NodeRecord>,
    /// Label overflow lists.
    pub node_labels: DynamicStore,
    /// Relationships.
    pub relationships: RecordStore<RelationshipRecord>,
    /// Relationship groups.
    pub groups: RecordStore<RelationshipGroupRecord>,
    /// Property records.
    pub properties: RecordStore<PropertyRecord>,
    /// Long strings.
    pub strings: DynamicStore,
    /// Arrays.
    pub arrays: DynamicStore,
    /// Label tokens.
    pub label_tokens: RecordStore<TokenRecord>,
    /// Relationship type tokens.
    pub rel_type_tokens: RecordStore<TokenRecord>,
    /// Property key tokens.
    pub property_key_tokens: RecordStore<TokenRecord>,
    /// Names of every token.
    pub token_names: DynamicStore,
    /// Schema rule records.
    pub schema: RecordStore<SchemaRecord>,
    /// Schema rule payloads.
    pub schema_payloads: DynamicStore,
    /// Metadata.
    pub meta: MetaDataStore,
}

impl RecordStores {
    /// Maps every store file in `dir` through `cache`, creating missing ones.
    pub fn open(
        dir: &Path,
        cache: &PageCache,
        dynamic_data_size: usize,
        initial_kernel_version: KernelVersion,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut files = Vec::with_capacity(StoreType::ALL.len());
        let mut map = |store: StoreType| -> Result<Arc<PagedFile>> {
            let file = cache.map(&dir.join(store.file_name()))?;
            files.push(Arc::clone(&file));
            Ok(file)
        };
        let nodes = RecordStore::open(map(StoreType::Node)?, NodeRecord::SIZE)?;
        let node_labels = DynamicStore::open(map(StoreType::NodeLabels)?, 60)?;
        let relationships =
            RecordStore::open(map(StoreType::Relationship)?, RelationshipRecord::SIZE)?;
        let groups = RecordStore::open(
            map(StoreType::RelationshipGroup)?,
            RelationshipGroupRecord::SIZE,
        )?;
        let properties = RecordStore::open(map(StoreType::Property)?, PropertyRecord::SIZE)?;
        let strings = DynamicStore::open(map(StoreType::PropertyStrings)?, dynamic_data_size)?;
        let arrays = DynamicStore::open(map(StoreType::PropertyArrays)?, dynamic_data_size)?;
        let label_tokens = RecordStore::open(map(StoreType::LabelToken)?, TokenRecord::SIZE)?;
        let rel_type_tokens =
            RecordStore::open(map(StoreType::RelationshipTypeToken)?, TokenRecord::SIZE)?;
        let property_key_tokens =
            RecordStore::open(map(StoreType::PropertyKeyToken)?, TokenRecord::SIZE)?;
        let token_names = DynamicStore::open(map(StoreType::TokenNames)?, 30)?;
        let schema = RecordStore::open(map(StoreType::Schema)?, SchemaRecord::SIZE)?;
        let schema_payloads = DynamicStore::open(map(StoreType::SchemaPayloads)?, 60)?;
        let meta = MetaDataStore::open(map(StoreType::MetaData)?, initial_kernel_version)?;
        info!(
            dir = %dir.display(),
            nodes = nodes.high_id(),
            relationships = relationships.high_id(),
            "stores.opened"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            nodes,
            node_labels,
            relationships,
            groups,
            properties,
            strings,
            arrays,
            label_tokens,
            rel_type_tokens,
            property_key_tokens,
            token_names,
            schema,
            schema_payloads,
            meta,
        })
    }

    /// Database directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Token store for `kind`.
    pub fn token_store(&self, kind: TokenKind) -> &RecordStore<TokenRecord> {
        match kind {
            TokenKind::Label => &self.label_tokens,
            TokenKind::RelationshipType => &self.rel_type_tokens,
            TokenKind::PropertyKey => &self.property_key_tokens,
        }
    }

    /// Forces every store to disk.
    pub fn flush(&self) -> Result<()> {
        for file in &self.files {
            file.flush_and_force()?;
        }
        Ok(())
    }

    /// Empties every store except the metadata store.
    pub fn truncate_data(&self) -> Result<()> {
        self.nodes.truncate()?;
        self.node_labels.records().truncate()?;
        self.relationships.truncate()?;
        self.groups.truncate()?;
        self.properties.truncate()?;
        self.strings.records().truncate()?;
        self.arrays.records().truncate()?;
        self.label_tokens.truncate()?;
        self.rel_type_tokens.truncate()?;
        self.property_key_tokens.truncate()?;
        self.token_names.records().truncate()?;
        self.schema.truncate()?;
        self.schema_payloads.records().truncate()?;
        info!(dir = %self.dir.display(), "stores.truncated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::Record;

    #[test]
    fn stores_create_their_files_and_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = PageCache::new(1024, 16);
        {
            let stores = RecordStores::open(dir.path(), &cache, 32, KernelVersion::V1)?;
            let id = stores.nodes.next_id();
            let mut node = NodeRecord::new(id);
            node.in_use = true;
            stores.nodes.update_record(&node)?;
            stores.flush()?;
        }
        for store in StoreType::ALL {
            assert!(dir.path().join(store.file_name()).exists(), "{store:?}");
        }
        let cache = PageCache::new(1024, 16);
        let stores = RecordStores::open(dir.path(), &cache, 32, KernelVersion::V3)?;
        assert_eq!(stores.nodes.high_id(), 1);
        assert_eq!(stores.meta.kernel_version()?, KernelVersion::V1);
        stores.truncate_data()?;
        assert_eq!(stores.nodes.high_id(), 0);
        Ok(())
    }
}
