#![forbid(unsafe_code)]
//! Entity lock manager with shared/exclusive modes, wait-for deadlock detection and timeouts.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::types::{PenumbraError, Result};

/// Class of lockable resource.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    /// The single kernel upgrade resource.
    DatabaseUpgrade,
    /// Schema changes.
    Schema,
    /// A node.
    Node,
    /// A relationship.
    Relationship,
    /// Token creation, keyed by token kind.
    Token,
}

/// A concrete lockable resource.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    /// Class of the resource.
    pub kind: ResourceType,
    /// Identifier within the class.
    pub id: u64,
}

impl ResourceId {
    /// The kernel upgrade resource.
    pub const UPGRADE: ResourceId = ResourceId {
        kind: ResourceType::DatabaseUpgrade,
        id: 0,
    };
    /// The global schema resource.
    pub const SCHEMA: ResourceId = ResourceId {
        kind: ResourceType::Schema,
        id: 0,
    };

    /// Lock on a node.
    pub fn node(id: u64) -> Self {
        Self {
            kind: ResourceType::Node,
            id,
        }
    }

    /// Lock on a relationship.
    pub fn relationship(id: u64) -> Self {
        Self {
            kind: ResourceType::Relationship,
            id,
        }
    }

    /// Lock serializing token creation of one kind.
    pub fn token(kind: u64) -> Self {
        Self {
            kind: ResourceType::Token,
            id: kind,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.id)
    }
}

/// Lock mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Compatible with other shared holders.
    Shared,
    /// Compatible with nothing held by others.
    Exclusive,
}

type ClientId = u64;

#[derive(Default)]
struct LockEntry {
    shared: FxHashMap<ClientId, u32>,
    exclusive: Option<(ClientId, u32)>,
}

impl LockEntry {
    fn grantable(&self, client: ClientId, mode: LockMode) -> bool {
        let exclusive_by_other = self.exclusive.is_some_and(|(holder, _)| holder != client);
        match mode {
            LockMode::Shared => !exclusive_by_other,
            LockMode::Exclusive => {
                !exclusive_by_other && self.shared.keys().all(|holder| *holder == client)
            }
        }
    }

    fn holders(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.shared
            .keys()
            .copied()
            .chain(self.exclusive.map(|(holder, _)| holder))
    }

    fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }
}

#[derive(Default)]
struct LockTable {
    locks: FxHashMap<ResourceId, LockEntry>,
    waiting: FxHashMap<ClientId, ResourceId>,
}

impl LockTable {
    /// Walks the wait-for graph from the holders of `wanted` looking for `client`.
    fn would_deadlock(&self, client: ClientId, wanted: ResourceId) -> bool {
        let mut visited = FxHashSet::default();
        let mut frontier = vec![wanted];
        while let Some(resource) = frontier.pop() {
            let Some(entry) = self.locks.get(&resource) else {
                continue;
            };
            for holder in entry.holders() {
                if holder == client {
                    if resource == wanted {
                        continue;
                    }
                    return true;
                }
                if !visited.insert(holder) {
                    continue;
                }
                if let Some(next) = self.waiting.get(&holder) {
                    frontier.push(*next);
                }
            }
        }
        false
    }
}

struct Inner {
    table: Mutex<LockTable>,
    released: Condvar,
    next_client: AtomicU64,
    default_timeout: Duration,
}

/// Process-wide lock manager. Cheap to clone.
#[derive(Clone)]
pub struct LockService {
    inner: Arc<Inner>,
}

impl LockService {
    /// Creates a lock manager whose acquisitions time out after `default_timeout`.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(LockTable::default()),
                released: Condvar::new(),
                next_client: AtomicU64::new(1),
                default_timeout,
            }),
        }
    }

    /// Opens a client; every lock it holds is released when it is dropped.
    pub fn new_client(&self) -> LockClient {
        LockClient {
            inner: Arc::clone(&self.inner),
            id: self.inner.next_client.fetch_add(1, Ordering::Relaxed),
            held: FxHashMap::default(),
        }
    }

    /// Number of resources currently locked by anyone.
    pub fn locked_resources(&self) -> usize {
        self.inner.table.lock().locks.len()
    }
}

/// Per-transaction handle onto the lock manager.
pub struct LockClient {
    inner: Arc<Inner>,
    id: ClientId,
    held: FxHashMap<(ResourceId, bool), u32>,
}

impl LockClient {
    /// Acquires `resource` in `mode` with the service default timeout.
    pub fn acquire(&mut self, resource: ResourceId, mode: LockMode) -> Result<()> {
        let timeout = self.inner.default_timeout;
        self.acquire_with_timeout(resource, mode, timeout)
    }

    /// Acquires `resource` in `mode`, failing with `LockTimeout` after `timeout`
    /// and with `Deadlock` when waiting would close a cycle.
    pub fn acquire_with_timeout(
        &mut self,
        resource: ResourceId,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut table = self.inner.table.lock();
        loop {
            let entry = table.locks.entry(resource).or_default();
            if entry.grantable(self.id, mode) {
                match mode {
                    LockMode::Shared => *entry.shared.entry(self.id).or_insert(0) += 1,
                    LockMode::Exclusive => {
                        let count = entry.exclusive.map(|(_, c)| c).unwrap_or(0);
                        entry.exclusive = Some((self.id, count + 1));
                    }
                }
                table.waiting.remove(&self.id);
                *self
                    .held
                    .entry((resource, mode == LockMode::Exclusive))
                    .or_insert(0) += 1;
                trace!(client = self.id, %resource, ?mode, "locks.acquired");
                return Ok(());
            }
            table.waiting.insert(self.id, resource);
            if table.would_deadlock(self.id, resource) {
                table.waiting.remove(&self.id);
                debug!(client = self.id, %resource, "locks.deadlock");
                return Err(PenumbraError::Deadlock {
                    resource: resource.to_string(),
                });
            }
            if self
                .inner
                .released
                .wait_until(&mut table, deadline)
                .timed_out()
            {
                let still_blocked = !table
                    .locks
                    .get(&resource)
                    .is_some_and(|entry| entry.grantable(self.id, mode));
                if still_blocked {
                    table.waiting.remove(&self.id);
                    return Err(PenumbraError::LockTimeout {
                        resource: resource.to_string(),
                    });
                }
            }
        }
    }

    /// Attempts an exclusive hold of `resource` for at most `timeout`.
    ///
    /// Returns `Ok(false)` instead of an error when the lock is contended,
    /// whether by timing out or because waiting would deadlock.
    pub fn try_acquire_exclusive_with_timeout(
        &mut self,
        resource: ResourceId,
        timeout: Duration,
    ) -> Result<bool> {
        match self.acquire_with_timeout(resource, LockMode::Exclusive, timeout) {
            Ok(()) => Ok(true),
            Err(PenumbraError::LockTimeout { .. }) | Err(PenumbraError::Deadlock { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Releases one hold of `resource` in `mode`.
    pub fn release(&mut self, resource: ResourceId, mode: LockMode) {
        let key = (resource, mode == LockMode::Exclusive);
        let Some(count) = self.held.get_mut(&key) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.held.remove(&key);
        }
        let mut table = self.inner.table.lock();
        Self::release_in(&mut table, self.id, resource, mode, 1);
        drop(table);
        self.inner.released.notify_all();
    }

    /// Whether this client holds `resource` in at least `mode`.
    pub fn holds(&self, resource: ResourceId, mode: LockMode) -> bool {
        match mode {
            LockMode::Exclusive => self.held.contains_key(&(resource, true)),
            LockMode::Shared => {
                self.held.contains_key(&(resource, false)) || self.held.contains_key(&(resource, true))
            }
        }
    }

    fn release_in(table: &mut LockTable, client: ClientId, resource: ResourceId, mode: LockMode, n: u32) {
        let Some(entry) = table.locks.get_mut(&resource) else {
            return;
        };
        match mode {
            LockMode::Shared => {
                if let Some(count) = entry.shared.get_mut(&client) {
                    *count = count.saturating_sub(n);
                    if *count == 0 {
                        entry.shared.remove(&client);
                    }
                }
            }
            LockMode::Exclusive => {
                if let Some((holder, count)) = entry.exclusive {
                    if holder == client {
                        entry.exclusive = (count > n).then(|| (holder, count - n));
                    }
                }
            }
        }
        if entry.is_empty() {
            table.locks.remove(&resource);
        }
    }

    /// Releases everything this client holds.
    pub fn release_all(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let mut table = self.inner.table.lock();
        for ((resource, exclusive), count) in self.held.drain() {
            let mode = if exclusive {
                LockMode::Exclusive
            } else {
                LockMode::Shared
            };
            Self::release_in(&mut table, self.id, resource, mode, count);
        }
        table.waiting.remove(&self.id);
        drop(table);
        self.inner.released.notify_all();
    }
}

impl Drop for LockClient {
    fn drop(&mut self) {
        self.release_all();
    }
}
