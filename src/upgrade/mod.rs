//! Live kernel version upgrades.
//!
//! A database sits at its kernel version until the dbms runtime version is
//! raised above it. The next write transaction then tries to upgrade: it
//! takes the upgrade lock exclusively and a transaction slot, writes an
//! upgrade transaction at the new version and continues at that version.
//! When either cannot be had in time, the write proceeds at the old version
//! and the upgrade is retried by a later write.

mod runtime;

pub use runtime::{DbmsRuntimeRepository, DbmsRuntimeVersion, InMemoryRuntimeRepository};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::types::{KernelVersion, Result, TxId};

/// Where a database stands relative to the runtime version.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum UpgradeState {
    /// The runtime asks for nothing newer than the current kernel version.
    AtOldVersion,
    /// The runtime permits a newer kernel version; the next write upgrades.
    UpgradePending,
    /// An upgrade transaction is being written.
    UpgradeInProgress,
    /// An upgrade completed and the database is at the runtime's version.
    AtNewVersion,
}

/// Why an upgrade attempt gave way to the triggering write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeferralReason {
    /// Another transaction held the upgrade lock past the timeout.
    LockConflict,
    /// No transaction slot was left for the upgrade transaction.
    MaxConcurrentTransactions,
}

/// Something the upgrader did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpgradeEvent {
    /// An upgrade was due but could not run yet.
    Deferred {
        /// Why the attempt gave up.
        reason: DeferralReason,
        /// Version the store stayed at.
        from: KernelVersion,
        /// Version the runtime asked for.
        to: KernelVersion,
    },
    /// The upgrade transaction committed.
    Completed {
        /// Previous version.
        from: KernelVersion,
        /// New version.
        to: KernelVersion,
        /// Transaction that carried the upgrade.
        tx_id: TxId,
    },
}

impl fmt::Display for UpgradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeEvent::Deferred {
                reason: DeferralReason::LockConflict,
                from,
                to,
            } => write!(
                f,
                "upgrade transaction from {from} to {to} not possible right now due to \
                 conflicting transaction, will retry on next write"
            ),
            UpgradeEvent::Deferred {
                reason: DeferralReason::MaxConcurrentTransactions,
                from,
                to,
            } => write!(
                f,
                "upgrade transaction from {from} to {to} not possible right now because \
                 maximum concurrently executed transactions was reached, will retry on next write"
            ),
            UpgradeEvent::Completed { from, to, tx_id } => {
                write!(f, "upgrade transaction from {from} to {to} completed in {tx_id}")
            }
        }
    }
}

/// Counters over every upgrade attempt.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UpgradeStats {
    /// Upgrade checks that found a pending target.
    pub attempts: u64,
    /// Attempts that gave up and left the write to proceed.
    pub deferrals: u64,
    /// Upgrade transactions written.
    pub completions: u64,
}

/// Decides when an upgrade is due and keeps track of attempts.
pub struct KernelUpgrader {
    repository: Arc<dyn DbmsRuntimeRepository>,
    in_progress: AtomicBool,
    attempts: AtomicU64,
    deferrals: AtomicU64,
    completions: AtomicU64,
    events: Mutex<Vec<UpgradeEvent>>,
}

impl KernelUpgrader {
    /// An upgrader consulting `repository`.
    pub fn new(repository: Arc<dyn DbmsRuntimeRepository>) -> Self {
        Self {
            repository,
            in_progress: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            deferrals: AtomicU64::new(0),
            completions: AtomicU64::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Where the runtime version comes from.
    pub fn repository(&self) -> &Arc<dyn DbmsRuntimeRepository> {
        &self.repository
    }

    /// The version a database at `current` should move to, if any.
    pub fn target(&self, current: KernelVersion) -> Result<Option<KernelVersion>> {
        let wanted = self.repository.version()?.kernel_version();
        Ok((wanted > current).then_some(wanted))
    }

    /// Pending, deferred or current, for a database at `current`.
    pub fn state(&self, current: KernelVersion) -> Result<UpgradeState> {
        if self.in_progress.load(Ordering::Acquire) {
            return Ok(UpgradeState::UpgradeInProgress);
        }
        if self.target(current)?.is_some() {
            return Ok(UpgradeState::UpgradePending);
        }
        if self.completions.load(Ordering::Relaxed) > 0 {
            Ok(UpgradeState::AtNewVersion)
        } else {
            Ok(UpgradeState::AtOldVersion)
        }
    }

    /// Marks an attempt as started.
    pub(crate) fn begin(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.in_progress.store(true, Ordering::Release);
    }

    /// Ends an attempt that stopped before writing anything.
    pub(crate) fn abandon(&self) {
        self.in_progress.store(false, Ordering::Release);
    }

    pub(crate) fn deferred(&self, reason: DeferralReason, from: KernelVersion, to: KernelVersion) {
        let event = UpgradeEvent::Deferred { reason, from, to };
        warn!(%from, %to, ?reason, "{event}");
        self.deferrals.fetch_add(1, Ordering::Relaxed);
        self.events.lock().push(event);
    }

    pub(crate) fn completed(&self, from: KernelVersion, to: KernelVersion, tx_id: TxId) {
        let event = UpgradeEvent::Completed { from, to, tx_id };
        info!(%from, %to, tx = %tx_id, "{event}");
        self.completions.fetch_add(1, Ordering::Relaxed);
        self.in_progress.store(false, Ordering::Release);
        self.events.lock().push(event);
    }

    /// Every event so far, oldest first.
    pub fn events(&self) -> Vec<UpgradeEvent> {
        self.events.lock().clone()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> UpgradeStats {
        UpgradeStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            deferrals: self.deferrals.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
        }
    }
}
