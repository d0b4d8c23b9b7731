//! Core identifiers, the crate error type, and small shared primitives.

#![forbid(unsafe_code)]

use std::fmt;
use std::io;

use thiserror::Error;

/// Checksum helpers used by the transaction log.
pub mod checksum;

pub use checksum::{entry_crc32, TransactionChecksum};

/// Sentinel stored in on-disk pointer fields that reference nothing.
pub const NULL_REFERENCE: u64 = u64::MAX;

/// Returns `true` when `reference` is the on-disk null pointer.
#[inline]
pub fn is_null(reference: u64) -> bool {
    reference == NULL_REFERENCE
}

/// Converts an on-disk pointer into an `Option`.
#[inline]
pub fn reference(raw: u64) -> Option<u64> {
    if is_null(raw) {
        None
    } else {
        Some(raw)
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $repr:ty, $label:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub $repr);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                Self(value)
            }
        }
    };
}

entity_id!(
    /// Identifier of a node record.
    NodeId,
    u64,
    "node"
);
entity_id!(
    /// Identifier of a relationship record.
    RelationshipId,
    u64,
    "relationship"
);
entity_id!(
    /// Label token identifier.
    LabelId,
    u32,
    "label"
);
entity_id!(
    /// Relationship type token identifier.
    RelTypeId,
    u32,
    "type"
);
entity_id!(
    /// Property key token identifier.
    PropertyKeyId,
    u32,
    "key"
);
entity_id!(
    /// Transaction identifier assigned at commit.
    TxId,
    u64,
    "tx"
);

/// Version of the on-disk and in-log format understood by the kernel.
///
/// Versions are totally ordered; a store never moves backwards.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KernelVersion {
    /// Fixed-width command encoding.
    V1,
    /// Varint command encoding; first version that can upgrade itself.
    V2,
    /// Property commands also record their owning entity.
    V3,
}

impl KernelVersion {
    /// The newest version this build can write.
    pub const LATEST: KernelVersion = KernelVersion::V3;

    /// All versions in ascending order.
    pub const ALL: [KernelVersion; 3] = [KernelVersion::V1, KernelVersion::V2, KernelVersion::V3];

    /// The byte persisted in log headers and the metadata store.
    pub fn version(self) -> u8 {
        match self {
            KernelVersion::V1 => 1,
            KernelVersion::V2 => 2,
            KernelVersion::V3 => 3,
        }
    }

    /// Maps a persisted version byte back to a version.
    pub fn from_version(raw: u8) -> Result<Self> {
        match raw {
            1 => Ok(KernelVersion::V1),
            2 => Ok(KernelVersion::V2),
            3 => Ok(KernelVersion::V3),
            other => Err(PenumbraError::UnsupportedKernelVersion(other)),
        }
    }

    /// Whether a transaction committed at this version may carry a kernel upgrade.
    pub fn supports_upgrade_command(self) -> bool {
        self >= KernelVersion::V2
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.version())
    }
}

/// Error type shared by every layer of the engine.
#[derive(Debug, Error)]
pub enum PenumbraError {
    /// Wrapped I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Data on disk or in the log failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Corruption with dynamic context.
    #[error("corruption: {0}")]
    CorruptionDetail(String),
    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A record required to be in use was not.
    #[error("{kind} record {id} not in use")]
    NotFound {
        /// Store that was read.
        kind: &'static str,
        /// Record id that was requested.
        id: u64,
    },
    /// Lock acquisition would close a wait-for cycle.
    #[error("deadlock detected while waiting for {resource}")]
    Deadlock {
        /// Resource whose acquisition was refused.
        resource: String,
    },
    /// Lock acquisition exceeded its deadline.
    #[error("timed out acquiring {resource}")]
    LockTimeout {
        /// Resource that could not be acquired.
        resource: String,
    },
    /// A schema constraint or structural integrity rule was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// Applying committed commands failed; the database is now unhealthy.
    #[error("transaction apply failed: {0}")]
    TransactionApply(String),
    /// The database has panicked and refuses further work.
    #[error("database unhealthy: {0}")]
    DatabaseUnhealthy(String),
    /// The concurrent transaction budget is exhausted.
    #[error("maximum concurrently executed transactions ({limit}) reached")]
    MaxConcurrentTransactions {
        /// Configured budget.
        limit: usize,
    },
    /// The transaction was already committed or rolled back.
    #[error("transaction is closed")]
    TransactionClosed,
    /// Configuration failed to parse or validate.
    #[error("configuration error: {0}")]
    Config(String),
    /// A version byte names a kernel version this build does not know.
    #[error("unsupported kernel version {0}")]
    UnsupportedKernelVersion(u8),
}

impl PenumbraError {
    /// Whether retrying the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PenumbraError::Deadlock { .. }
                | PenumbraError::LockTimeout { .. }
                | PenumbraError::MaxConcurrentTransactions { .. }
        )
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PenumbraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_versions_are_ordered() {
        assert!(KernelVersion::V1 < KernelVersion::V2);
        assert!(KernelVersion::V2 < KernelVersion::LATEST);
        for version in KernelVersion::ALL {
            assert_eq!(KernelVersion::from_version(version.version()).unwrap(), version);
        }
        assert!(matches!(
            KernelVersion::from_version(9),
            Err(PenumbraError::UnsupportedKernelVersion(9))
        ));
        assert!(!KernelVersion::V1.supports_upgrade_command());
        assert!(KernelVersion::V2.supports_upgrade_command());
    }

    #[test]
    fn null_reference_maps_to_none() {
        assert_eq!(reference(NULL_REFERENCE), None);
        assert_eq!(reference(7), Some(7));
    }

    #[test]
    fn retryable_errors() {
        assert!(PenumbraError::Deadlock {
            resource: "node#1".into()
        }
        .is_retryable());
        assert!(!PenumbraError::Corruption("x").is_retryable());
    }
}
