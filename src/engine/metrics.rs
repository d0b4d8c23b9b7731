use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Receives counters from the command and apply pipeline.
pub trait EngineMetrics: Send + Sync {
    /// A node record went into use.
    fn node_created(&self);

    /// A node record went out of use.
    fn node_deleted(&self);

    /// A relationship record went into use.
    fn relationship_created(&self);

    /// A relationship record went out of use.
    fn relationship_deleted(&self);

    /// A sparse node was converted to relationship groups.
    fn dense_conversion(&self);

    /// A transaction with `commands` commands was applied.
    fn transaction_applied(&self, commands: usize);
}

/// Discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl EngineMetrics for NoopMetrics {
    fn node_created(&self) {}
    fn node_deleted(&self) {}
    fn relationship_created(&self) {}
    fn relationship_deleted(&self) {}
    fn dense_conversion(&self) {}
    fn transaction_applied(&self, _commands: usize) {}
}

/// Atomic counters for every metric.
#[derive(Default)]
pub struct CounterMetrics {
    /// Nodes created.
    pub nodes_created: AtomicU64,
    /// Nodes deleted.
    pub nodes_deleted: AtomicU64,
    /// Relationships created.
    pub relationships_created: AtomicU64,
    /// Relationships deleted.
    pub relationships_deleted: AtomicU64,
    /// Sparse nodes converted to dense.
    pub dense_conversions: AtomicU64,
    /// Transactions applied to the stores.
    pub transactions_applied: AtomicU64,
    /// Commands applied to the stores.
    pub commands_applied: AtomicU64,
}

/// Plain copy of [`CounterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// See [`CounterMetrics::nodes_created`].
    pub nodes_created: u64,
    /// See [`CounterMetrics::nodes_deleted`].
    pub nodes_deleted: u64,
    /// See [`CounterMetrics::relationships_created`].
    pub relationships_created: u64,
    /// See [`CounterMetrics::relationships_deleted`].
    pub relationships_deleted: u64,
    /// See [`CounterMetrics::dense_conversions`].
    pub dense_conversions: u64,
    /// See [`CounterMetrics::transactions_applied`].
    pub transactions_applied: u64,
    /// See [`CounterMetrics::commands_applied`].
    pub commands_applied: u64,
}

impl CounterMetrics {
    /// Reads every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            nodes_created: self.nodes_created.load(Ordering::Relaxed),
            nodes_deleted: self.nodes_deleted.load(Ordering::Relaxed),
            relationships_created: self.relationships_created.load(Ordering::Relaxed),
            relationships_deleted: self.relationships_deleted.load(Ordering::Relaxed),
            dense_conversions: self.dense_conversions.load(Ordering::Relaxed),
            transactions_applied: self.transactions_applied.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
        }
    }
}

impl EngineMetrics for CounterMetrics {
    fn node_created(&self) {
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    fn node_deleted(&self) {
        self.nodes_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn relationship_created(&self) {
        self.relationships_created.fetch_add(1, Ordering::Relaxed);
    }

    fn relationship_deleted(&self) {
        self.relationships_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn dense_conversion(&self) {
        self.dense_conversions.fetch_add(1, Ordering::Relaxed);
    }

    fn transaction_applied(&self, commands: usize) {
        self.transactions_applied.fetch_add(1, Ordering::Relaxed);
        self.commands_applied
            .fetch_add(commands as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = CounterMetrics::default();
        metrics.node_created();
        metrics.node_created();
        metrics.relationship_deleted();
        metrics.transaction_applied(5);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.nodes_created, 2);
        assert_eq!(snapshot.relationships_deleted, 1);
        assert_eq!(snapshot.commands_applied, 5);
    }
}
