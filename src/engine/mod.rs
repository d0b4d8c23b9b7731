//! The storage engine: command creation and the apply pipeline.
//!
//! A committing transaction hands its [`TxState`] to
//! [`StorageEngine::create_commands`], which walks it into a record-level
//! delta and extracts an ordered command list. After the commands are in the
//! log, [`StorageEngine::apply`] runs them through the batch-applier chain.
//! Any failure while applying marks the database unhealthy.

mod apply;
mod context;
mod health;
mod metrics;
mod properties;
mod record_state;
mod relationships;
mod visitor;

pub use context::CommandCreationContext;
pub use health::{DatabaseHealth, HealthReport, HealthStatus};
pub use metrics::{CounterMetrics, EngineMetrics, MetricsSnapshot, NoopMetrics};

pub(crate) use apply::read_properties;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::command::Command;
use crate::primitives::pager::PageCache;
use crate::schema::{decode_rule, SchemaCache};
use crate::storage::cursor::NodeCursor;
use crate::storage::index::{LabelScanIndex, LabelUpdate, PropertyIndexes};
use crate::storage::record::{Record, RecordLoad, SchemaRecord};
use crate::storage::{CountsStore, MetaPosition, RecordStores, TokenHolders};
use crate::txstate::TxState;
use crate::types::{KernelVersion, PenumbraError, Result, TxId};

use apply::{
    ApplyLocks, BatchApplier, CacheInvalidationApplier, CountsApplier, HighIdApplier,
    IndexApplier, StoreApplier,
};
use record_state::TransactionRecordState;
use visitor::CommandVisitor;

/// Why a batch is being applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    /// Freshly committed transactions.
    Internal,
    /// Transactions replayed from the log at startup.
    Recovery,
}

/// Commands of one committed transaction.
#[derive(Clone, Debug)]
pub struct CommandsToApply {
    /// Id the transaction committed under.
    pub tx_id: TxId,
    /// Kernel version the transaction was written at.
    pub kernel_version: KernelVersion,
    /// Commands in application order.
    pub commands: Vec<Command>,
}

/// Tuning knobs of the engine.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Degree above which a node is converted to relationship groups.
    pub dense_node_threshold: u64,
    /// Ids pulled from a shared generator at a time.
    pub id_batch_size: usize,
    /// Payload bytes per dynamic string and array record.
    pub dynamic_record_data_size: usize,
    /// Largest degree for which traversal buffers groups in memory.
    pub record_buffer_group_limit: usize,
    /// Kernel version of a store created from scratch.
    pub initial_kernel_version: KernelVersion,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dense_node_threshold: 50,
            id_batch_size: 64,
            dynamic_record_data_size: 120,
            record_buffer_group_limit: 1000,
            initial_kernel_version: KernelVersion::LATEST,
        }
    }
}

/// Owns the stores and every structure derived from them.
pub struct StorageEngine {
    stores: RecordStores,
    tokens: TokenHolders,
    schema: SchemaCache,
    counts: CountsStore,
    label_index: LabelScanIndex,
    property_indexes: PropertyIndexes,
    health: Arc<DatabaseHealth>,
    metrics: Arc<dyn EngineMetrics>,
    locks: ApplyLocks,
    options: EngineOptions,
}

impl StorageEngine {
    /// Opens every store in `dir` and loads the token and schema caches.
    /// Indexes stay empty until [`StorageEngine::rebuild_indexes`].
    pub fn open(
        dir: &Path,
        cache: &PageCache,
        options: EngineOptions,
        health: Arc<DatabaseHealth>,
        metrics: Arc<dyn EngineMetrics>,
    ) -> Result<Self> {
        let stores = RecordStores::open(
            dir,
            cache,
            options.dynamic_record_data_size,
            options.initial_kernel_version,
        )?;
        let counts = CountsStore::open(dir)?;
        let engine = Self {
            stores,
            tokens: TokenHolders::default(),
            schema: SchemaCache::default(),
            counts,
            label_index: LabelScanIndex::default(),
            property_indexes: PropertyIndexes::default(),
            health,
            metrics,
            locks: ApplyLocks::default(),
            options,
        };
        engine.load_caches()?;
        Ok(engine)
    }

    /// Reloads token holders and the schema cache from the stores.
    pub fn load_caches(&self) -> Result<()> {
        self.tokens.load(&self.stores)?;
        let mut rules = Vec::new();
        let mut record = SchemaRecord::new(0);
        for id in 0..self.stores.schema.high_id() {
            self.stores
                .schema
                .get_record(id, &mut record, RecordLoad::Check)?;
            if !record.in_use() {
                continue;
            }
            let payload = self.stores.schema_payloads.read_chain(record.payload_id)?;
            rules.push(decode_rule(&payload)?);
        }
        self.schema.load(rules);
        Ok(())
    }

    /// Repopulates the label scan and property indexes from the stores.
    pub fn rebuild_indexes(&self) -> Result<()> {
        self.label_index.clear();
        self.property_indexes.clear();
        let mut cursor = NodeCursor::new(&self.stores);
        cursor.scan();
        let mut updates = Vec::new();
        while cursor.next()? {
            let labels = cursor.labels()?;
            if !labels.is_empty() {
                updates.push(LabelUpdate {
                    node: cursor.id(),
                    before: Vec::new(),
                    after: labels,
                });
            }
        }
        cursor.close();
        self.label_index.apply(&updates);
        let snapshot = self.schema.snapshot();
        for index in snapshot.indexes() {
            self.property_indexes.create(index);
            apply::populate_index(&self.stores, &self.label_index, &self.property_indexes, index)?;
        }
        info!(
            labelled_nodes = updates.len(),
            indexes = self.property_indexes.descriptors().len(),
            "engine.indexes_rebuilt"
        );
        Ok(())
    }

    /// A fresh id-batching context for one transaction.
    pub fn new_command_creation_context(&self) -> CommandCreationContext {
        CommandCreationContext::new(&self.stores, self.options.id_batch_size)
    }

    /// Translates `tx` into the commands that make it durable.
    ///
    /// Integrity problems such as deleting a node that still has
    /// relationships fail here, before anything is written.
    pub fn create_commands(
        &self,
        tx: &TxState,
        context: &mut CommandCreationContext,
    ) -> Result<Vec<Command>> {
        let mut state =
            TransactionRecordState::new(&self.stores, context, self.options.dense_node_threshold);
        tx.accept(&mut CommandVisitor { state: &mut state })?;
        for _ in 0..state.dense_conversions {
            self.metrics.dense_conversion();
        }
        let touched = state.touched_records();
        let commands = state.extract_commands();
        debug!(touched, commands = commands.len(), "engine.commands_created");
        Ok(commands)
    }

    /// Applies a batch of committed transactions in order.
    ///
    /// A failure marks the database unhealthy and surfaces as
    /// [`PenumbraError::TransactionApply`].
    pub fn apply(&self, batch: &[CommandsToApply], mode: ApplyMode) -> Result<()> {
        self.apply_batch(batch, mode).map_err(|err| {
            self.health.panic(&err);
            match err {
                PenumbraError::TransactionApply(_) => err,
                other => PenumbraError::TransactionApply(other.to_string()),
            }
        })
    }

    fn apply_batch(&self, batch: &[CommandsToApply], mode: ApplyMode) -> Result<()> {
        let mut chain: Vec<Box<dyn BatchApplier + '_>> = vec![Box::new(StoreApplier {
            stores: &self.stores,
            metrics: self.metrics.as_ref(),
        })];
        if mode == ApplyMode::Recovery {
            chain.push(Box::new(HighIdApplier {
                stores: &self.stores,
            }));
        }
        chain.push(Box::new(CacheInvalidationApplier {
            schema: &self.schema,
            tokens: &self.tokens,
        }));
        chain.push(Box::new(CountsApplier {
            counts: &self.counts,
            mode,
        }));
        if mode == ApplyMode::Internal {
            chain.push(Box::new(IndexApplier::new(
                &self.stores,
                &self.schema,
                &self.label_index,
                &self.property_indexes,
            )));
        }

        for tx in batch {
            let _group = self.locks.lock_group(tx);
            for applier in chain.iter_mut() {
                applier.prepare(tx)?;
            }
            for applier in chain.iter_mut() {
                applier.apply(tx)?;
            }
            self.metrics.transaction_applied(tx.commands.len());
            debug!(tx = %tx.tx_id, commands = tx.commands.len(), ?mode, "engine.applied");
        }
        Ok(())
    }

    /// Forces stores and counts to disk and records `last_closed` as the
    /// transaction every store now reflects.
    pub fn checkpoint(&self, last_closed: TxId) -> Result<()> {
        self.stores.flush()?;
        self.counts.set_tx_id(last_closed.max(self.counts.tx_id()));
        self.counts.checkpoint()?;
        self.stores.meta.set(MetaPosition::LastClosedTx, last_closed.0)?;
        self.stores.meta.flush()?;
        info!(tx = %last_closed, "engine.checkpoint");
        Ok(())
    }

    /// Deletes all data while keeping transaction ids monotonic.
    pub fn truncate(&self) -> Result<()> {
        let last = self.stores.meta.last_committed_tx()?;
        self.stores.truncate_data()?;
        self.counts.clear(last);
        self.label_index.clear();
        self.property_indexes.clear();
        self.schema.load(Vec::new());
        self.tokens.clear();
        Ok(())
    }

    /// Kernel version recorded in the meta store.
    pub fn kernel_version(&self) -> Result<KernelVersion> {
        self.stores.meta.kernel_version()
    }

    /// Record stores.
    pub fn stores(&self) -> &RecordStores {
        &self.stores
    }

    /// Token holders.
    pub fn tokens(&self) -> &TokenHolders {
        &self.tokens
    }

    /// Cached schema rules.
    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    /// Committed entity counts.
    pub fn counts(&self) -> &CountsStore {
        &self.counts
    }

    /// Label scan index.
    pub fn label_index(&self) -> &LabelScanIndex {
        &self.label_index
    }

    /// Online property indexes.
    pub fn property_indexes(&self) -> &PropertyIndexes {
        &self.property_indexes
    }

    /// Shared health flag.
    pub fn health(&self) -> &Arc<DatabaseHealth> {
        &self.health
    }

    /// Options the engine was opened with.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::PropertyOwner;
    use crate::storage::{TokenKind, Value};
    use crate::txstate::CreatedRelationship;
    use crate::types::{LabelId, NodeId, PropertyKeyId, RelTypeId};

    fn engine(dir: &Path) -> StorageEngine {
        let cache = PageCache::new(4096, 256);
        StorageEngine::open(
            dir,
            &cache,
            EngineOptions::default(),
            Arc::new(DatabaseHealth::default()),
            Arc::new(NoopMetrics),
        )
        .unwrap()
    }

    #[test]
    fn commands_apply_and_update_counts_and_labels() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = engine(dir.path());
        let mut context = engine.new_command_creation_context();
        let a = context.reserve_node();
        let b = context.reserve_node();
        let r = context.reserve_relationship();

        let mut tx = TxState::default();
        tx.token_do_create(TokenKind::Label, 0, "Person");
        tx.node_do_create(a);
        tx.node_do_create(b);
        tx.node_add_label(a, LabelId(0));
        tx.node_set_property(a, PropertyKeyId(0), Value::from("ada"));
        tx.relationship_do_create(
            r,
            CreatedRelationship {
                rel_type: RelTypeId(0),
                start: a,
                end: b,
            },
        );
        let commands = engine.create_commands(&tx, &mut context)?;
        assert!(matches!(commands[0], Command::Token { .. }));
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::Property(change) if change.after.owner == Some(PropertyOwner::Node(a.0))
        )));
        engine.apply(
            &[CommandsToApply {
                tx_id: TxId(2),
                kernel_version: KernelVersion::LATEST,
                commands,
            }],
            ApplyMode::Internal,
        )?;
        context.close();

        assert_eq!(engine.tokens().id_of(TokenKind::Label, "Person"), Some(0));
        assert_eq!(engine.counts().node_count(None), 2);
        assert_eq!(engine.counts().node_count(Some(LabelId(0))), 1);
        assert_eq!(engine.counts().relationship_count(Some(RelTypeId(0))), 1);
        assert_eq!(engine.label_index().nodes_with_label(LabelId(0)), vec![NodeId(a.0)]);
        assert_eq!(engine.stores().meta.last_committed_tx()?, TxId(2));
        Ok(())
    }

    #[test]
    fn failed_apply_panics_health() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = engine(dir.path());
        let bogus = Command::Token {
            kind: TokenKind::Label,
            change: crate::command::Change::new(
                crate::storage::record::TokenRecord::new(0),
                {
                    let mut record = crate::storage::record::TokenRecord::new(0);
                    record.in_use = true;
                    record.name_records = vec![crate::storage::record::DynamicRecord {
                        id: 0,
                        in_use: true,
                        start: true,
                        next: crate::types::NULL_REFERENCE,
                        data: vec![0xFF, 0xFE],
                    }];
                    record
                },
            ),
        };
        let result = engine.apply(
            &[CommandsToApply {
                tx_id: TxId(2),
                kernel_version: KernelVersion::LATEST,
                commands: vec![bogus],
            }],
            ApplyMode::Internal,
        );
        assert!(matches!(result, Err(PenumbraError::TransactionApply(_))));
        assert!(!engine.health().is_healthy());
        Ok(())
    }
}
