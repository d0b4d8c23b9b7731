//! Commands: the physical before/after images a transaction writes to the log.
//!
//! A transaction commits as an ordered list of commands. The same list is
//! applied to the stores right after the append and replayed from the log
//! during recovery, so every command carries everything needed to redo it.

mod codec;
mod reader;

pub use codec::{serialize_command, serialize_commands};
pub use reader::{CommandReader, CommandReaderFactory};

use crate::schema::SchemaRule;
use crate::storage::record::{
    NodeRecord, PropertyRecord, RelationshipGroupRecord, RelationshipRecord, SchemaRecord,
    TokenRecord,
};
use crate::storage::TokenKind;
use crate::types::{KernelVersion, LabelId, RelTypeId};

/// A record before and after a change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change<R> {
    /// Record as it was.
    pub before: R,
    /// Record as it becomes.
    pub after: R,
}

impl<R> Change<R> {
    /// Pairs `before` with `after`.
    pub fn new(before: R, after: R) -> Self {
        Self { before, after }
    }
}

/// One unit of change inside a committed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Node record change.
    Node(Change<NodeRecord>),
    /// Relationship record change.
    Relationship(Change<RelationshipRecord>),
    /// Relationship group record change.
    RelationshipGroup(Change<RelationshipGroupRecord>),
    /// Property record change.
    Property(Change<PropertyRecord>),
    /// A schema record and, unless the rule was dropped, the rule it stores.
    Schema {
        /// The schema record itself.
        change: Change<SchemaRecord>,
        /// Rule after the change.
        rule: Option<SchemaRule>,
    },
    /// Token record change in the store of `kind`.
    Token {
        /// Which token store.
        kind: TokenKind,
        /// The token record.
        change: Change<TokenRecord>,
    },
    /// Delta to the node count of a label, or of all nodes for `None`.
    NodeCount {
        /// Counted label.
        label: Option<LabelId>,
        /// Signed change.
        delta: i64,
    },
    /// Delta to the relationship count of a type, or of all relationships for `None`.
    RelationshipCount {
        /// Counted type.
        rel_type: Option<RelTypeId>,
        /// Signed change.
        delta: i64,
    },
    /// Moves the store to a newer kernel version.
    UpgradeKernelVersion {
        /// Version before.
        from: KernelVersion,
        /// Version after.
        to: KernelVersion,
    },
}

impl Command {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Node(_) => "node",
            Command::Relationship(_) => "relationship",
            Command::RelationshipGroup(_) => "relationship_group",
            Command::Property(_) => "property",
            Command::Schema { .. } => "schema",
            Command::Token { .. } => "token",
            Command::NodeCount { .. } => "node_count",
            Command::RelationshipCount { .. } => "relationship_count",
            Command::UpgradeKernelVersion { .. } => "upgrade_kernel_version",
        }
    }
}
