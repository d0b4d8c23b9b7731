//! Penumbra: a record-oriented graph storage engine.
//!
//! Nodes, relationships and properties live in fixed-size record files read
//! through reusable cursors. Writes are collected per transaction, turned
//! into commands, appended to a segmented log and applied through a chain of
//! batch appliers. A running database moves to a newer kernel version on the
//! first write after the runtime version is raised.

#![warn(missing_docs)]

/// Identifiers, kernel versions and the crate error type.
pub mod types;

/// Page cache, locks and the transaction log.
pub mod primitives;

/// Record stores, cursors and indexes.
pub mod storage;

/// Index and constraint rules and their cache.
pub mod schema;

/// Uncommitted transaction changes.
pub mod txstate;

/// Commands and their versioned encodings.
pub mod command;

/// Command creation and the apply pipeline.
pub mod engine;

/// Kernel version upgrades.
pub mod upgrade;

/// Databases and transactions.
pub mod db;

/// Configuration.
pub mod config;

/// Tracing subscriber setup.
pub mod logging;

pub use config::Config;
pub use db::{Database, RelationshipView, Transaction, TransactionKind};
pub use storage::cursor::{Direction, RelationshipSelection};
pub use storage::{TokenKind, Value};
pub use types::{
    KernelVersion, LabelId, NodeId, PenumbraError, PropertyKeyId, RelTypeId, RelationshipId,
    Result, TxId,
};
