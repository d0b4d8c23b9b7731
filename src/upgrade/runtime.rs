use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{KernelVersion, PenumbraError, Result};

/// Version of the dbms runtime component, negotiated outside the database.
///
/// Raising it permits, but does not perform, a kernel upgrade: the first
/// write after the bump moves the database to [`DbmsRuntimeVersion::kernel_version`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DbmsRuntimeVersion {
    /// Original runtime.
    V1,
    /// Adds the second kernel format.
    V2,
    /// Adds the third kernel format.
    V3,
}

impl DbmsRuntimeVersion {
    /// Newest runtime this build knows.
    pub const LATEST: DbmsRuntimeVersion = DbmsRuntimeVersion::V3;

    /// Numeric component value as stored in the system graph.
    pub fn version(self) -> u32 {
        match self {
            DbmsRuntimeVersion::V1 => 1,
            DbmsRuntimeVersion::V2 => 2,
            DbmsRuntimeVersion::V3 => 3,
        }
    }

    /// Parses a stored component value.
    pub fn from_version(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(DbmsRuntimeVersion::V1),
            2 => Ok(DbmsRuntimeVersion::V2),
            3 => Ok(DbmsRuntimeVersion::V3),
            other => Err(PenumbraError::Config(format!(
                "unknown dbms runtime version {other}"
            ))),
        }
    }

    /// Kernel version a database should be at under this runtime.
    pub fn kernel_version(self) -> KernelVersion {
        match self {
            DbmsRuntimeVersion::V1 => KernelVersion::V1,
            DbmsRuntimeVersion::V2 => KernelVersion::V2,
            DbmsRuntimeVersion::V3 => KernelVersion::V3,
        }
    }

    /// Runtime version matching `kernel`.
    pub fn for_kernel(kernel: KernelVersion) -> Self {
        match kernel {
            KernelVersion::V1 => DbmsRuntimeVersion::V1,
            KernelVersion::V2 => DbmsRuntimeVersion::V2,
            KernelVersion::V3 => DbmsRuntimeVersion::V3,
        }
    }
}

impl fmt::Display for DbmsRuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dbms-runtime-{}", self.version())
    }
}

/// Source of the current runtime version.
pub trait DbmsRuntimeRepository: Send + Sync {
    /// The version currently in force.
    fn version(&self) -> Result<DbmsRuntimeVersion>;

    /// Records a new runtime version. Lowering it is rejected.
    fn set_version(&self, version: DbmsRuntimeVersion) -> Result<()>;
}

/// Repository keeping the version in memory.
#[derive(Debug)]
pub struct InMemoryRuntimeRepository {
    version: RwLock<DbmsRuntimeVersion>,
}

impl InMemoryRuntimeRepository {
    /// A repository starting at `version`.
    pub fn new(version: DbmsRuntimeVersion) -> Self {
        Self {
            version: RwLock::new(version),
        }
    }
}

impl Default for InMemoryRuntimeRepository {
    fn default() -> Self {
        Self::new(DbmsRuntimeVersion::LATEST)
    }
}

impl DbmsRuntimeRepository for InMemoryRuntimeRepository {
    fn version(&self) -> Result<DbmsRuntimeVersion> {
        Ok(*self.version.read())
    }

    fn set_version(&self, version: DbmsRuntimeVersion) -> Result<()> {
        let mut current = self.version.write();
        if version < *current {
            return Err(PenumbraError::Config(format!(
                "runtime version cannot go back from {} to {version}",
                *current
            )));
        }
        *current = version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_versions_map_to_kernel_versions() {
        for kernel in KernelVersion::ALL {
            assert_eq!(DbmsRuntimeVersion::for_kernel(kernel).kernel_version(), kernel);
        }
        assert_eq!(
            DbmsRuntimeVersion::from_version(2).unwrap(),
            DbmsRuntimeVersion::V2
        );
        assert!(DbmsRuntimeVersion::from_version(9).is_err());
    }

    #[test]
    fn in_memory_repository_never_goes_back() {
        let repository = InMemoryRuntimeRepository::new(DbmsRuntimeVersion::V2);
        repository.set_version(DbmsRuntimeVersion::V3).unwrap();
        assert!(repository.set_version(DbmsRuntimeVersion::V1).is_err());
        assert_eq!(repository.version().unwrap(), DbmsRuntimeVersion::V3);
    }
}
