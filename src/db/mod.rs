//! The database: transactions, commit, recovery and the kernel upgrade step.
//!
//! A committing write runs, in order, the optional upgrade step, constraint
//! validation, command creation, the log append and the apply pipeline. The
//! last three happen under one commit lock, so transaction ids, log order
//! and apply order always agree.

mod constraints;
mod recovery;
mod runtime;
mod transaction;
mod view;

pub use runtime::{SystemGraphRuntimeRepository, RUNTIME_COMPONENT_KEY, VERSION_LABEL};
pub use transaction::{Transaction, TransactionKind};
pub use view::RelationshipView;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::command::{serialize_commands, Command};
use crate::config::Config;
use crate::engine::{
    ApplyMode, CommandCreationContext, CommandsToApply, CounterMetrics, DatabaseHealth,
    HealthReport, MetricsSnapshot, StorageEngine,
};
use crate::primitives::locks::{LockClient, LockMode, LockService, ResourceId};
use crate::primitives::log::{LogFiles, LogTransaction};
use crate::primitives::pager::PageCache;
use crate::storage::TokenKind;
use crate::txstate::TxState;
use crate::types::{KernelVersion, PenumbraError, Result, TxId};
use crate::upgrade::{
    DbmsRuntimeRepository, DbmsRuntimeVersion, DeferralReason, InMemoryRuntimeRepository,
    KernelUpgrader, UpgradeEvent, UpgradeState, UpgradeStats,
};

/// Directory under the database directory holding log segments.
pub const LOG_DIR_NAME: &str = "txlogs";

/// Counts open transactions against the configured limit.
struct TransactionBudget {
    limit: usize,
    active: AtomicUsize,
}

impl TransactionBudget {
    fn try_acquire(&self) -> Option<TransactionSlot<'_>> {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if self.limit != 0 && current >= self.limit {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(TransactionSlot { budget: self }),
                Err(actual) => current = actual,
            }
        }
    }
}

/// One unit of the transaction budget, returned on drop.
pub(crate) struct TransactionSlot<'db> {
    budget: &'db TransactionBudget,
}

impl Drop for TransactionSlot<'_> {
    fn drop(&mut self) {
        self.budget.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An open database directory.
///
/// Shared by reference between threads; every transaction borrows it.
pub struct Database {
    dir: PathBuf,
    config: Config,
    engine: StorageEngine,
    log: LogFiles,
    locks: LockService,
    /// Id of the last transaction appended to the log.
    commit: Mutex<TxId>,
    budget: TransactionBudget,
    upgrader: KernelUpgrader,
    metrics: Arc<CounterMetrics>,
    closed: AtomicBool,
}

impl Database {
    /// Opens or creates the database in `dir` and recovers it.
    ///
    /// The runtime version defaults to the one matching the store's kernel
    /// version, so nothing is upgraded until the runtime is raised.
    pub fn open(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        Self::open_inner(dir.as_ref(), config, None)
    }

    /// Opens the database with an externally managed runtime version.
    pub fn open_with_runtime(
        dir: impl AsRef<Path>,
        config: Config,
        runtime: Arc<dyn DbmsRuntimeRepository>,
    ) -> Result<Self> {
        Self::open_inner(dir.as_ref(), config, Some(runtime))
    }

    fn open_inner(
        dir: &Path,
        config: Config,
        runtime: Option<Arc<dyn DbmsRuntimeRepository>>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(dir)?;
        let cache = PageCache::new(config.page_size, config.page_cache_pages);
        let health = Arc::new(DatabaseHealth::default());
        let metrics = Arc::new(CounterMetrics::default());
        let engine = StorageEngine::open(
            dir,
            &cache,
            config.engine_options()?,
            health,
            metrics.clone(),
        )?;
        let log = LogFiles::open(&dir.join(LOG_DIR_NAME), config.log_rotation_threshold_bytes)?;
        let recovered = recovery::recover(&engine, &log)?;

        let kernel_version = engine.kernel_version()?;
        let runtime = runtime.unwrap_or_else(|| {
            Arc::new(InMemoryRuntimeRepository::new(DbmsRuntimeVersion::for_kernel(
                kernel_version,
            )))
        });
        info!(
            dir = %dir.display(),
            %kernel_version,
            last_tx = %recovered.last_tx_id,
            replayed = recovered.replayed,
            "database.opened"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            locks: LockService::new(config.lock_timeout()),
            budget: TransactionBudget {
                limit: config.max_concurrent_transactions,
                active: AtomicUsize::new(0),
            },
            config,
            engine,
            log,
            commit: Mutex::new(recovered.last_tx_id),
            upgrader: KernelUpgrader::new(runtime),
            metrics,
            closed: AtomicBool::new(false),
        })
    }

    /// Starts a transaction that only reads.
    pub fn begin_read(&self) -> Result<Transaction<'_>> {
        self.begin(TransactionKind::Read)
    }

    /// Starts a transaction that may write.
    pub fn begin_write(&self) -> Result<Transaction<'_>> {
        self.begin(TransactionKind::Write)
    }

    fn begin(&self, kind: TransactionKind) -> Result<Transaction<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PenumbraError::Invalid("database is closed"));
        }
        self.engine.health().assert_healthy()?;
        let slot = self
            .budget
            .try_acquire()
            .ok_or(PenumbraError::MaxConcurrentTransactions {
                limit: self.budget.limit,
            })?;
        Ok(Transaction::new(self, kind, slot, self.locks.new_client()))
    }

    /// Id of `name` in the `kind` namespace, creating the token if needed.
    ///
    /// Creation commits its own transaction right away. It takes no budget
    /// slot and never triggers a kernel upgrade.
    pub fn create_token(&self, kind: TokenKind, name: &str) -> Result<u32> {
        if name.is_empty() {
            return Err(PenumbraError::Invalid("token name must not be empty"));
        }
        if let Some(id) = self.engine.tokens().id_of(kind, name) {
            return Ok(id);
        }
        self.engine.health().assert_healthy()?;
        let mut last = self.commit.lock();
        if let Some(id) = self.engine.tokens().id_of(kind, name) {
            return Ok(id);
        }
        let raw = self.engine.stores().token_store(kind).ids().next_id();
        let id = u32::try_from(raw).map_err(|_| PenumbraError::Invalid("token id space exhausted"))?;
        let mut state = TxState::default();
        state.token_do_create(kind, id, name);
        let mut context = self.engine.new_command_creation_context();
        let result = self.engine.create_commands(&state, &mut context).and_then(|commands| {
            let kernel_version = self.engine.kernel_version()?;
            self.append_and_apply(&mut last, kernel_version, commands)
        });
        context.close();
        let tx_id = result?;
        debug!(?kind, name, id, tx = %tx_id, "database.token_created");
        Ok(id)
    }

    /// Commits `state`. Returns `None` when there was nothing to write.
    pub(crate) fn commit_transaction(
        &self,
        state: &TxState,
        context: &mut CommandCreationContext,
        locks: &mut LockClient,
        may_upgrade: bool,
    ) -> Result<Option<TxId>> {
        if !state.has_changes() {
            return Ok(None);
        }
        self.engine.health().assert_healthy()?;
        let upgraded = if may_upgrade { self.maybe_upgrade(locks)? } else { None };
        // After an upgrade the commit lock is still held, so the triggering
        // transaction is the next one in the log.
        let mut last = match upgraded {
            Some(guard) => guard,
            None => self.commit.lock(),
        };
        constraints::validate(&self.engine, state)?;
        let commands = self.engine.create_commands(state, context)?;
        let kernel_version = self.engine.kernel_version()?;
        let tx_id = self.append_and_apply(&mut last, kernel_version, commands)?;
        Ok(Some(tx_id))
    }

    /// Writes one transaction to the log and applies it. The caller holds the
    /// commit lock; `last` is its guarded value.
    fn append_and_apply(
        &self,
        last: &mut TxId,
        kernel_version: KernelVersion,
        commands: Vec<Command>,
    ) -> Result<TxId> {
        let tx_id = TxId(last.0 + 1);
        let serialized = serialize_commands(&commands, kernel_version)?;
        self.log.append(&LogTransaction {
            kernel_version,
            tx_id: tx_id.0,
            time_written: now_millis(),
            commands: serialized,
        })?;
        *last = tx_id;
        self.engine.apply(
            &[CommandsToApply {
                tx_id,
                kernel_version,
                commands,
            }],
            ApplyMode::Internal,
        )?;
        Ok(tx_id)
    }

    /// Runs the upgrade step for a committing write holding the shared
    /// upgrade lock. A deferred upgrade is not an error. When the upgrade
    /// was written, returns the commit lock it was written under.
    fn maybe_upgrade(&self, locks: &mut LockClient) -> Result<Option<MutexGuard<'_, TxId>>> {
        let current = self.engine.kernel_version()?;
        let Some(target) = self.upgrader.target(current)? else {
            return Ok(None);
        };
        self.upgrader.begin();
        let outcome = self.try_upgrade(locks, current, target);
        if !matches!(outcome, Ok(Some(_))) {
            self.upgrader.abandon();
        }
        outcome
    }

    fn try_upgrade(
        &self,
        locks: &mut LockClient,
        current: KernelVersion,
        target: KernelVersion,
    ) -> Result<Option<MutexGuard<'_, TxId>>> {
        let timeout = self.config.upgrade_lock_timeout();
        let acquired = locks.try_acquire_exclusive_with_timeout(ResourceId::UPGRADE, timeout)?;
        if !acquired {
            self.upgrader
                .deferred(DeferralReason::LockConflict, current, target);
            return Ok(None);
        }
        let outcome = self.write_upgrade(current, target);
        locks.release(ResourceId::UPGRADE, LockMode::Exclusive);
        outcome
    }

    fn write_upgrade(
        &self,
        current: KernelVersion,
        target: KernelVersion,
    ) -> Result<Option<MutexGuard<'_, TxId>>> {
        let Some(_slot) = self.budget.try_acquire() else {
            self.upgrader
                .deferred(DeferralReason::MaxConcurrentTransactions, current, target);
            return Ok(None);
        };
        let mut last = self.commit.lock();
        let from = self.engine.kernel_version()?;
        if from >= target {
            return Ok(None);
        }
        let tx_id = self.append_and_apply(
            &mut last,
            target,
            vec![Command::UpgradeKernelVersion { from, to: target }],
        )?;
        self.upgrader.completed(from, target, tx_id);
        Ok(Some(last))
    }

    /// Flushes every store and records the last committed transaction as
    /// closed, so recovery starts after it.
    pub fn checkpoint(&self) -> Result<TxId> {
        let last = self.commit.lock();
        self.log.force()?;
        self.engine.checkpoint(*last)?;
        Ok(*last)
    }

    /// Deletes every entity, token and schema rule. Transaction ids keep
    /// counting from where they were.
    pub fn truncate(&self) -> Result<()> {
        let last = self.commit.lock();
        self.engine.truncate()?;
        self.log.reset(self.engine.kernel_version()?, last.0)?;
        self.engine.checkpoint(*last)?;
        info!(last_tx = %*last, "database.truncated");
        Ok(())
    }

    /// Closes the database, checkpointing first when configured to.
    pub fn close(self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        if self.config.checkpoint_on_close && self.engine.health().is_healthy() {
            self.checkpoint()?;
        }
        info!(dir = %self.dir.display(), "database.closed");
        Ok(())
    }

    /// Health status and cause.
    pub fn health(&self) -> HealthReport {
        self.engine.health().report()
    }

    /// Current kernel version of the store.
    pub fn kernel_version(&self) -> Result<KernelVersion> {
        self.engine.kernel_version()
    }

    /// Where the database stands relative to the runtime version.
    pub fn upgrade_state(&self) -> Result<UpgradeState> {
        self.upgrader.state(self.engine.kernel_version()?)
    }

    /// Every deferral and completion so far.
    pub fn upgrade_events(&self) -> Vec<UpgradeEvent> {
        self.upgrader.events()
    }

    /// Upgrade counters.
    pub fn upgrade_stats(&self) -> UpgradeStats {
        self.upgrader.stats()
    }

    /// The runtime version source.
    pub fn runtime(&self) -> &Arc<dyn DbmsRuntimeRepository> {
        self.upgrader.repository()
    }

    /// Engine counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Id of the last committed transaction.
    pub fn last_committed_tx(&self) -> TxId {
        *self.commit.lock()
    }

    /// Transactions currently holding a budget slot.
    pub fn active_transactions(&self) -> usize {
        self.budget.active.load(Ordering::Acquire)
    }

    /// The storage engine.
    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    /// Transaction log files.
    pub fn log_files(&self) -> &LogFiles {
        &self.log
    }

    /// Configuration the database was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Database directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::default().page_size(4096).page_cache_pages(64)
    }

    #[test]
    fn budget_limits_open_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path(), config().max_concurrent_transactions(2)).unwrap();
        let first = db.begin_read().unwrap();
        let second = db.begin_write().unwrap();
        let err = db.begin_read().err().unwrap();
        assert!(matches!(err, PenumbraError::MaxConcurrentTransactions { limit: 2 }));
        assert!(err.is_retryable());
        drop(first);
        assert_eq!(db.active_transactions(), 1);
        db.begin_read().unwrap().rollback().unwrap();
        drop(second);
        assert_eq!(db.active_transactions(), 0);
    }

    #[test]
    fn tokens_commit_their_own_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path(), config()).unwrap();
        let person = db.create_token(TokenKind::Label, "Person").unwrap();
        assert_eq!(db.create_token(TokenKind::Label, "Person").unwrap(), person);
        let knows = db.create_token(TokenKind::RelationshipType, "KNOWS").unwrap();
        assert_eq!(knows, 0);
        assert_eq!(db.last_committed_tx(), TxId(2));
        assert!(db.create_token(TokenKind::PropertyKey, "").is_err());
        assert_eq!(db.active_transactions(), 0);
    }

    #[test]
    fn empty_commit_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path(), config()).unwrap();
        let tx = db.begin_write().unwrap();
        assert_eq!(tx.commit().unwrap(), None);
        assert_eq!(db.last_committed_tx(), TxId(0));
    }
}
