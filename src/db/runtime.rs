//! Runtime version kept in a system database.

use std::path::Path;

use parking_lot::Mutex;
use tracing::info;

use crate::config::Config;
use crate::storage::{TokenKind, Value};
use crate::types::{LabelId, PenumbraError, PropertyKeyId, Result};
use crate::upgrade::{DbmsRuntimeRepository, DbmsRuntimeVersion};

use super::Database;

/// Label of the node carrying component versions.
pub const VERSION_LABEL: &str = "Version";
/// Property holding the runtime component version.
pub const RUNTIME_COMPONENT_KEY: &str = "dbms.runtime";

/// Reads and writes the runtime version as a property of the `Version`
/// node of a separate system database.
pub struct SystemGraphRuntimeRepository {
    system: Database,
    writes: Mutex<()>,
}

impl SystemGraphRuntimeRepository {
    /// Opens the system database in `dir`. A system database without a
    /// version node gets one at `initial`.
    pub fn open(dir: impl AsRef<Path>, config: Config, initial: DbmsRuntimeVersion) -> Result<Self> {
        let repository = Self {
            system: Database::open(dir, config)?,
            writes: Mutex::new(()),
        };
        if repository.read_version()?.is_none() {
            repository.write_version(initial)?;
            info!(version = %initial, "runtime.initialised");
        }
        Ok(repository)
    }

    /// The system database holding the runtime component.
    pub fn system(&self) -> &Database {
        &self.system
    }

    fn read_version(&self) -> Result<Option<DbmsRuntimeVersion>> {
        let tx = self.system.begin_read()?;
        let (Some(label), Some(key)) = (
            tx.token_id(TokenKind::Label, VERSION_LABEL),
            tx.token_id(TokenKind::PropertyKey, RUNTIME_COMPONENT_KEY),
        ) else {
            return Ok(None);
        };
        let Some(node) = tx.nodes_with_label(LabelId(label))?.first().copied() else {
            return Ok(None);
        };
        let version = match tx.node_property(node, PropertyKeyId(key))? {
            None => None,
            Some(Value::Long(raw)) => {
                let raw = u32::try_from(raw)
                    .map_err(|_| PenumbraError::Corruption("runtime version out of range"))?;
                Some(DbmsRuntimeVersion::from_version(raw)?)
            }
            Some(_) => {
                return Err(PenumbraError::Corruption(
                    "runtime version property is not an integer",
                ))
            }
        };
        tx.rollback()?;
        Ok(version)
    }

    fn write_version(&self, version: DbmsRuntimeVersion) -> Result<()> {
        let mut tx = self.system.begin_write()?;
        let label = tx.label(VERSION_LABEL)?;
        let key = tx.property_key(RUNTIME_COMPONENT_KEY)?;
        let node = match tx.nodes_with_label(label)?.first().copied() {
            Some(node) => node,
            None => {
                let node = tx.create_node()?;
                tx.add_label(node, label)?;
                node
            }
        };
        tx.set_node_property(node, key, Value::Long(i64::from(version.version())))?;
        tx.commit()?;
        Ok(())
    }
}

impl DbmsRuntimeRepository for SystemGraphRuntimeRepository {
    fn version(&self) -> Result<DbmsRuntimeVersion> {
        self.read_version()?.ok_or(PenumbraError::NotFound {
            kind: "runtime version",
            id: 0,
        })
    }

    fn set_version(&self, version: DbmsRuntimeVersion) -> Result<()> {
        let _guard = self.writes.lock();
        let current = self.version()?;
        if version < current {
            return Err(PenumbraError::Config(format!(
                "runtime version cannot go back from {current} to {version}"
            )));
        }
        if version != current {
            self.write_version(version)?;
            info!(from = %current, to = %version, "runtime.version_set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::default().page_size(4096).page_cache_pages(32)
    }

    #[test]
    fn version_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repository =
                SystemGraphRuntimeRepository::open(dir.path(), config(), DbmsRuntimeVersion::V1)
                    .unwrap();
            assert_eq!(repository.version().unwrap(), DbmsRuntimeVersion::V1);
            repository.set_version(DbmsRuntimeVersion::V3).unwrap();
            assert!(repository.set_version(DbmsRuntimeVersion::V2).is_err());
        }
        let repository =
            SystemGraphRuntimeRepository::open(dir.path(), config(), DbmsRuntimeVersion::V1).unwrap();
        assert_eq!(repository.version().unwrap(), DbmsRuntimeVersion::V3);
    }
}
